// Copyright (c) 2024 Daniel Bergløv
// 
// Permission is hereby granted, free of charge, to any person obtaining a 
// copy of this software and associated documentation files (the "Software"), 
// to deal in the Software without restriction, including without limitation 
// the rights to use, copy, modify, merge, publish, distribute, sublicense, 
// and/or sell copies of the Software, and to permit persons to whom the 
// Software is furnished to do so, subject to the following conditions:
// 
// The above copyright notice and this permission notice shall be included in 
// all copies or substantial portions of the Software.
// 
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR 
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, 
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE 
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER 
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING 
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER 
// DEALINGS IN THE SOFTWARE.

/*!
 * chkpasswd: verify a username/password pair against the system PAM stack.
 *
 * One call, one transaction: a conversation answering the password prompt,
 * `pam_start()`, a single `pam_authenticate()`, and an unconditional
 * `pam_end()`. The resulting PAM status is returned verbatim.
 *
 * ```no_run
 * # #[cfg(feature = "use_pam")] {
 * use chkpasswd::{Authorizer, LibPam, Status};
 *
 * let auth = Authorizer::new(LibPam);
 * assert_eq!(auth.authorize("alice", "correct-pw"), Status::SUCCESS);
 * # }
 * ```
 *
 * The real library is only linked with the `use_pam` feature. `MockPam`
 * is always available and backs the test suite.
 */

mod ffi {
    pub mod pam;
}

pub mod modules {
    pub mod shared;
    pub mod status;
    pub mod conv;
    pub mod auth;
    pub mod mock;
    pub mod passwd;
}

#[macro_use]
extern crate cfg_if;

pub use modules::status::{
    AuthError,
    Status
};

pub use modules::auth::{
    AuthConfig,
    AuthFlags,
    Authorizer,
    Backend
};

pub use modules::conv::{
    ConvState,
    MessageStyle,
    PasswordConv,
    Prompt
};

pub use modules::mock::{
    Event,
    MockHandle,
    MockPam
};

cfg_if! {
    if #[cfg(feature = "use_pam")] {
        pub use ffi::pam::{
            LibPam,
            PamHandle
        };
        
        pub use modules::auth::authorize;
    }
}
