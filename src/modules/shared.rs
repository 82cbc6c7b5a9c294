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
 * Constants and helper macros shared by the library and the `chkpasswd` binary.
 */

/// PAM service consulted when no other name is configured (`/etc/pam.d/chkpasswd`).
pub const DEFAULT_SERVICE: &'static str = "chkpasswd";

pub const EMPTY: &'static str = "";
pub const PATH_TTY: &'static str = "/dev/tty";
pub const PROMPT_TEXT: &'static str = "Password: ";

/// Upper bound used to pre-size password buffers, so they never reallocate
/// and leave unscrubbed copies behind.
pub const PASSWORD_MAX: usize = 512;

pub const MSG_IO_TTY_OPEN: &'static str = "Failed to open the controlling terminal";
pub const MSG_IO_TTY_ATTR: &'static str = "Failed to configure TTY for user input";
pub const MSG_IO_READ: &'static str = "Failed to read password";
pub const MSG_TOO_LONG: &'static str = "Password is too long";
pub const MSG_PARSE_UTF8: &'static str = "Failed to parse UTF-8 data";
pub const MSG_NO_PASSWORD: &'static str = "No password source available in non-interactive mode";
pub const MSG_NO_USER: &'static str = "Unable to determine the user to authenticate";

/**
 * Print a message to stderr and terminate the process.
 *
 * Only meant for the command line front end. Library code returns
 * a `Status` or a `Result` instead.
 */
#[macro_export]
macro_rules! errx {
    ($x:expr) => {
        std::process::exit($x);
    };
    
    ($x:expr, $y:expr) => {
        eprintln!("{}", $y);
        std::process::exit($x);
    };

    ($x:expr, $y:expr, $($z:expr),+) => {
        eprintln!($y, $($z),+);
        std::process::exit($x);
    };
}
