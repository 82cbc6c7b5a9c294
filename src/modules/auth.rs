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
 * Credential handshake against a PAM service.
 *
 * `Authorizer::authorize()` runs exactly one authenticate-and-teardown cycle:
 *
 * ```text
 * PasswordConv  →  start(service, user)  →  authenticate()  →  end(last status)
 * ```
 *
 * `authenticate()` only runs when `start()` succeeded, while `end()` runs on
 * every path. The external service itself sits behind the `Backend` trait so
 * the real libpam (`LibPam`, feature `use_pam`) and the in-process `MockPam`
 * are interchangeable.
 */

use bitflags::bitflags;
use libc::c_int;
use super::conv::PasswordConv;
use super::shared::DEFAULT_SERVICE;

use super::status::{
    AuthError,
    Status
};

use crate::ffi::pam::{
    PAM_DISALLOW_NULL_AUTHTOK,
    PAM_SILENT
};

use log::{
    debug,
    warn
};

bitflags! {
    /**
     * Flags passed to `pam_authenticate()`.
     */
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AuthFlags: c_int {
        const NONE = 0x00;
        const DISALLOW_NULL_AUTHTOK = PAM_DISALLOW_NULL_AUTHTOK;
        const SILENT = PAM_SILENT;
    }
}

/**
 * The external authentication service.
 *
 * A handle borrows the conversation for `'c`, so the conversation cannot be
 * moved or dropped while the service may still call back into it. Every
 * handle returned by `start()` is passed to `end()` exactly once, even when
 * `start()` itself reported a failure.
 */
pub trait Backend {
    type Handle<'c>;
    
    /**
     * Open a transaction for `user` under the policy `service`.
     */
    fn start<'c>(&self, service: &str, user: &str, conv: &'c mut PasswordConv<'_>) -> (Self::Handle<'c>, Status);
    
    /**
     * Drive one authentication attempt.
     */
    fn authenticate(&self, handle: &mut Self::Handle<'_>, flags: AuthFlags) -> Status;
    
    /**
     * Release the transaction, `last` is the last status observed on it.
     */
    fn end(&self, handle: Self::Handle<'_>, last: Status);
}

/**
 * Settings injected into an `Authorizer`.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// PAM service (policy) name, selects `/etc/pam.d/<service>`
    pub service: String,
    pub flags: AuthFlags
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            service: DEFAULT_SERVICE.to_string(),
            flags: AuthFlags::NONE
        }
    }
}

impl AuthConfig {
    pub fn new<S: Into<String>>(service: S) -> Self {
        AuthConfig {
            service: service.into(),
            ..Default::default()
        }
    }
    
    pub fn with_flags(mut self, flags: AuthFlags) -> Self {
        self.flags = flags;
        self
    }
}

/**
 * A transaction in progress.
 *
 * Tracks the last observed status and hands it to `Backend::end()` when
 * dropped, so release happens exactly once on every exit path.
 */
struct Transaction<'b, 'c, B: Backend> {
    backend: &'b B,
    handle: Option<B::Handle<'c>>,
    result: Status
}

impl<'b, 'c, B: Backend> Transaction<'b, 'c, B> {
    fn new(backend: &'b B, handle: B::Handle<'c>, result: Status) -> Self {
        Transaction {
            backend,
            handle: Some(handle),
            result
        }
    }
    
    fn authenticate(&mut self, flags: AuthFlags) -> Status {
        if let Some(handle) = self.handle.as_mut() {
            self.result = self.backend.authenticate(handle, flags);
        }
        
        self.result
    }
    
    fn result(&self) -> Status {
        self.result
    }
}

impl<'b, 'c, B: Backend> Drop for Transaction<'b, 'c, B> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.backend.end(handle, self.result);
        }
    }
}

/**
 * Runs password authentications against one PAM service.
 *
 * Holds no per-call state. Concurrent calls on a shared `Authorizer` are
 * fine as long as the backend is `Sync`, each call gets its own transaction
 * and its own conversation.
 */
#[derive(Debug)]
pub struct Authorizer<B: Backend> {
    backend: B,
    config: AuthConfig
}

impl<B: Backend> Authorizer<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, AuthConfig::default())
    }
    
    pub fn with_config(backend: B, config: AuthConfig) -> Self {
        Authorizer {
            backend,
            config
        }
    }
    
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
    
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /**
     * Authenticate `username` with `password`, exactly once.
     *
     * @param username  Passed to the service as is, no validation is done here.
     * @param password  Only borrowed for the duration of the call.
     *
     * @return The status of the authentication step, or the status of
     *         `start()` when the transaction could not be opened.
     */
    pub fn authorize(&self, username: &str, password: &str) -> Status {
        let mut conv = PasswordConv::new(password);
        let service = self.config.service.as_str();
        
        debug!("Starting PAM transaction for '{}' with service '{}'", username, service);
        
        let (handle, status) = self.backend.start(service, username, &mut conv);
        let mut transaction = Transaction::new(&self.backend, handle, status);
        
        if status.is_success() {
            transaction.authenticate(self.config.flags);
            
        } else {
            warn!("Failed to start PAM transaction with service '{}': {}", service, status);
        }
        
        let result = transaction.result();
        
        // Release before the conversation goes out of scope
        drop(transaction);
        
        debug!("PAM authentication for '{}' finished: {}", username, result);
        
        result
    }
    
    /**
     * Same as `authorize()`, classified into a `Result`.
     */
    pub fn authorize_user(&self, username: &str, password: &str) -> Result<(), AuthError> {
        self.authorize(username, password).into_result()
    }
}

/**
 * Authenticate against the system PAM stack using the default service.
 */
#[cfg(feature = "use_pam")]
pub fn authorize(username: &str, password: &str) -> Status {
    Authorizer::new(crate::ffi::pam::LibPam).authorize(username, password)
}
