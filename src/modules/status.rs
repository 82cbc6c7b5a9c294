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
 * PAM status codes and their classification.
 *
 * `Status` wraps the raw integer returned by libpam. Every value is kept
 * verbatim, including codes outside the known vocabulary, so callers can
 * always forward exactly what the authentication stack reported.
 */

use crate::ffi::pam::*;
use libc::c_int;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(c_int);

impl Status {
    pub const SUCCESS: Status = Status(PAM_SUCCESS);
    pub const OPEN_ERR: Status = Status(PAM_OPEN_ERR);
    pub const SYMBOL_ERR: Status = Status(PAM_SYMBOL_ERR);
    pub const SERVICE_ERR: Status = Status(PAM_SERVICE_ERR);
    pub const SYSTEM_ERR: Status = Status(PAM_SYSTEM_ERR);
    pub const BUF_ERR: Status = Status(PAM_BUF_ERR);
    pub const PERM_DENIED: Status = Status(PAM_PERM_DENIED);
    pub const AUTH_ERR: Status = Status(PAM_AUTH_ERR);
    pub const CRED_INSUFFICIENT: Status = Status(PAM_CRED_INSUFFICIENT);
    pub const AUTHINFO_UNAVAIL: Status = Status(PAM_AUTHINFO_UNAVAIL);
    pub const USER_UNKNOWN: Status = Status(PAM_USER_UNKNOWN);
    pub const MAXTRIES: Status = Status(PAM_MAXTRIES);
    pub const NEW_AUTHTOK_REQD: Status = Status(PAM_NEW_AUTHTOK_REQD);
    pub const ACCT_EXPIRED: Status = Status(PAM_ACCT_EXPIRED);
    pub const SESSION_ERR: Status = Status(PAM_SESSION_ERR);
    pub const CRED_UNAVAIL: Status = Status(PAM_CRED_UNAVAIL);
    pub const CRED_EXPIRED: Status = Status(PAM_CRED_EXPIRED);
    pub const CRED_ERR: Status = Status(PAM_CRED_ERR);
    pub const NO_MODULE_DATA: Status = Status(PAM_NO_MODULE_DATA);
    pub const CONV_ERR: Status = Status(PAM_CONV_ERR);
    pub const AUTHTOK_ERR: Status = Status(PAM_AUTHTOK_ERR);
    pub const AUTHTOK_RECOVERY_ERR: Status = Status(PAM_AUTHTOK_RECOVERY_ERR);
    pub const AUTHTOK_LOCK_BUSY: Status = Status(PAM_AUTHTOK_LOCK_BUSY);
    pub const AUTHTOK_DISABLE_AGING: Status = Status(PAM_AUTHTOK_DISABLE_AGING);
    pub const TRY_AGAIN: Status = Status(PAM_TRY_AGAIN);
    pub const IGNORE: Status = Status(PAM_IGNORE);
    pub const ABORT: Status = Status(PAM_ABORT);
    pub const AUTHTOK_EXPIRED: Status = Status(PAM_AUTHTOK_EXPIRED);
    pub const MODULE_UNKNOWN: Status = Status(PAM_MODULE_UNKNOWN);
    pub const BAD_ITEM: Status = Status(PAM_BAD_ITEM);
    pub const CONV_AGAIN: Status = Status(PAM_CONV_AGAIN);
    pub const INCOMPLETE: Status = Status(PAM_INCOMPLETE);

    pub const fn from_code(code: c_int) -> Self {
        Status(code)
    }
    
    pub const fn code(self) -> c_int {
        self.0
    }
    
    pub const fn is_success(self) -> bool {
        self.0 == PAM_SUCCESS
    }

    /**
     * Static description of the status, in the spirit of `pam_strerror()`.
     */
    pub fn description(self) -> &'static str {
        match self.0 {
            PAM_SUCCESS => "Success",
            PAM_OPEN_ERR => "Failed to load module",
            PAM_SYMBOL_ERR => "Symbol not found",
            PAM_SERVICE_ERR => "Error in service module",
            PAM_SYSTEM_ERR => "System error",
            PAM_BUF_ERR => "Memory buffer error",
            PAM_PERM_DENIED => "Permission denied",
            PAM_AUTH_ERR => "Authentication failure",
            PAM_CRED_INSUFFICIENT => "Insufficient credentials to access authentication data",
            PAM_AUTHINFO_UNAVAIL => "Authentication service cannot retrieve authentication info",
            PAM_USER_UNKNOWN => "User not known to the underlying authentication module",
            PAM_MAXTRIES => "Have exhausted maximum number of retries for service",
            PAM_NEW_AUTHTOK_REQD => "Authentication token is no longer valid; new one required",
            PAM_ACCT_EXPIRED => "User account has expired",
            PAM_SESSION_ERR => "Cannot make/remove an entry for the specified session",
            PAM_CRED_UNAVAIL => "Authentication service cannot retrieve user credentials",
            PAM_CRED_EXPIRED => "User credentials expired",
            PAM_CRED_ERR => "Failure setting user credentials",
            PAM_NO_MODULE_DATA => "No module specific data is present",
            PAM_CONV_ERR => "Conversation error",
            PAM_AUTHTOK_ERR => "Authentication token manipulation error",
            PAM_AUTHTOK_RECOVERY_ERR => "Authentication information cannot be recovered",
            PAM_AUTHTOK_LOCK_BUSY => "Authentication token lock busy",
            PAM_AUTHTOK_DISABLE_AGING => "Authentication token aging disabled",
            PAM_TRY_AGAIN => "Failed preliminary check by password service",
            PAM_IGNORE => "The return value should be ignored by PAM dispatch",
            PAM_ABORT => "Critical error - immediate abort",
            PAM_AUTHTOK_EXPIRED => "Authentication token expired",
            PAM_MODULE_UNKNOWN => "Module is unknown",
            PAM_BAD_ITEM => "Bad item passed to pam_*_item()",
            PAM_CONV_AGAIN => "Conversation is waiting for event",
            PAM_INCOMPLETE => "Application needs to call libpam again",
            _ => "Unknown PAM error"
        }
    }
    
    /**
     * Classify the status the way callers of `Authorizer::authorize_user()` see it.
     */
    pub fn into_result(self) -> Result<(), AuthError> {
        match self.0 {
            PAM_SUCCESS => Ok(()),
            PAM_USER_UNKNOWN => Err(AuthError::UnknownUser),
            PAM_AUTH_ERR => Err(AuthError::IncorrectPassword),
            _ => Err(AuthError::Failed(self))
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.0)
    }
}

impl From<Status> for c_int {
    fn from(status: Status) -> c_int {
        status.0
    }
}

/// Why an authentication attempt did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    UnknownUser,
    IncorrectPassword,
    Failed(Status),
}

impl AuthError {
    /**
     * The status this error was classified from.
     */
    pub fn status(&self) -> Status {
        match self {
            Self::UnknownUser => Status::USER_UNKNOWN,
            Self::IncorrectPassword => Status::AUTH_ERR,
            Self::Failed(status) => *status,
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownUser => f.write_str("Unknown user"),
            Self::IncorrectPassword => f.write_str("Incorrect password"),
            Self::Failed(status) => write!(f, "Authorization failed: {status}"),
        }
    }
}

impl std::error::Error for AuthError {}
