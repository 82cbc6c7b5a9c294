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
 * PAM (Pluggable Authentication Module) ABI and the password conversation bridge.
 *
 * This module holds everything that touches the C side of libpam: the
 * `pam_message`/`pam_response`/`pam_conv` layouts, the status and flag
 * constants (Linux-PAM numbering), the `extern "C"` conversation callback
 * that answers a prompt with a pre-supplied password, and, with the
 * `use_pam` feature, the `LibPam` backend that drives the real library.
 *
 * All `unsafe` FFI operations are encapsulated here. The conversation
 * callback is also what `MockPam` invokes, so the test double and the
 * real library exercise the exact same allocation and copy path.
 */

use crate::modules::conv::{
    MessageStyle,
    PasswordConv,
    Prompt
};

use crate::modules::status::Status;
use std::ffi::CStr;

use std::{
    mem, 
    ptr
};

use libc::{
    c_char,
    c_int, 
    c_void, 
    free, 
    malloc
};

// -------------------------
// Raw C types and constants
// -------------------------

/**
 * Opaque transaction handle owned by libpam.
 */
#[allow(non_camel_case_types)]
#[cfg_attr(not(feature = "use_pam"), allow(dead_code))]
#[repr(C)]
pub struct pam_handle_t {
    _private: [u8; 0]
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Copy, Clone)]
pub struct pam_message {
    pub msg_style: c_int,
    pub msg: *const c_char,
}

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Copy, Clone)]
pub struct pam_response {
    pub resp: *mut c_char,
    pub resp_retcode: c_int,
}

#[allow(non_camel_case_types)]
pub type pam_conv_fn = unsafe extern "C" fn(
    num_msg: c_int,
    msg: *mut *const pam_message,
    resp: *mut *mut pam_response,
    appdata_ptr: *mut c_void,
) -> c_int;

#[allow(non_camel_case_types)]
#[repr(C)]
#[derive(Copy, Clone)]
pub struct pam_conv {
    pub conv: Option<pam_conv_fn>,
    pub appdata_ptr: *mut c_void,
}

pub const PAM_SUCCESS: c_int = 0;
pub const PAM_OPEN_ERR: c_int = 1;
pub const PAM_SYMBOL_ERR: c_int = 2;
pub const PAM_SERVICE_ERR: c_int = 3;
pub const PAM_SYSTEM_ERR: c_int = 4;
pub const PAM_BUF_ERR: c_int = 5;
pub const PAM_PERM_DENIED: c_int = 6;
pub const PAM_AUTH_ERR: c_int = 7;
pub const PAM_CRED_INSUFFICIENT: c_int = 8;
pub const PAM_AUTHINFO_UNAVAIL: c_int = 9;
pub const PAM_USER_UNKNOWN: c_int = 10;
pub const PAM_MAXTRIES: c_int = 11;
pub const PAM_NEW_AUTHTOK_REQD: c_int = 12;
pub const PAM_ACCT_EXPIRED: c_int = 13;
pub const PAM_SESSION_ERR: c_int = 14;
pub const PAM_CRED_UNAVAIL: c_int = 15;
pub const PAM_CRED_EXPIRED: c_int = 16;
pub const PAM_CRED_ERR: c_int = 17;
pub const PAM_NO_MODULE_DATA: c_int = 18;
pub const PAM_CONV_ERR: c_int = 19;
pub const PAM_AUTHTOK_ERR: c_int = 20;
pub const PAM_AUTHTOK_RECOVERY_ERR: c_int = 21;
pub const PAM_AUTHTOK_LOCK_BUSY: c_int = 22;
pub const PAM_AUTHTOK_DISABLE_AGING: c_int = 23;
pub const PAM_TRY_AGAIN: c_int = 24;
pub const PAM_IGNORE: c_int = 25;
pub const PAM_ABORT: c_int = 26;
pub const PAM_AUTHTOK_EXPIRED: c_int = 27;
pub const PAM_MODULE_UNKNOWN: c_int = 28;
pub const PAM_BAD_ITEM: c_int = 29;
pub const PAM_CONV_AGAIN: c_int = 30;
pub const PAM_INCOMPLETE: c_int = 31;

pub const PAM_SILENT: c_int = 0x8000;
pub const PAM_DISALLOW_NULL_AUTHTOK: c_int = 0x0001;

pub const PAM_PROMPT_ECHO_OFF: c_int = 1;
pub const PAM_PROMPT_ECHO_ON: c_int = 2;
pub const PAM_ERROR_MSG: c_int = 3;
pub const PAM_TEXT_INFO: c_int = 4;

/// Linux-PAM never sends more messages than this in one batch.
pub const PAM_MAX_NUM_MSG: c_int = 32;

// -------------------------
// Conversation bridge
// -------------------------

/**
 * Bind a `PasswordConv` into the `pam_conv` descriptor handed to `pam_start()`.
 *
 * The descriptor stores a raw pointer to `conv`. The caller must keep `conv`
 * alive, and not move it, for as long as the transaction may call back.
 * `Backend` implementations enforce this with the `'c` borrow on their handle.
 */
pub fn password_conv(conv: &mut PasswordConv<'_>) -> pam_conv {
    pam_conv {
        conv: Some(pam_conv_password),
        appdata_ptr: conv as *mut PasswordConv<'_> as *mut c_void
    }
}

/**
 * Collect the prompt batch into owned `Prompt` values.
 *
 * Null message pointers become empty prompts with an unknown style,
 * the count is what matters to the conversation.
 */
unsafe fn read_prompts(num_msg: c_int, msg: *mut *const pam_message) -> Vec<Prompt> {
    if num_msg <= 0 || msg.is_null() {
        return Vec::new();
    }
    
    let count = num_msg.min(PAM_MAX_NUM_MSG) as usize;
    let mut prompts = Vec::with_capacity(count);
    
    for i in 0..count {
        let reqest_ptr = unsafe { 
            *msg.add(i) 
        };
        
        if reqest_ptr.is_null() {
            prompts.push(Prompt::new(MessageStyle::Other(-1), String::new()));
            continue;
        }
        
        let reqest = unsafe {
            &*reqest_ptr
        };
        
        let text = if reqest.msg.is_null() {
            String::new()
            
        } else {
            unsafe {
                CStr::from_ptr(reqest.msg).to_string_lossy().into_owned()
            }
        };
        
        prompts.push(Prompt::new(MessageStyle::from_raw(reqest.msg_style), text));
    }
    
    prompts
}

/**
 * Allocator used for the response handed to libpam. libpam releases it
 * with `free()`, so anything plugged in here must be `malloc()` compatible.
 */
type Allocator = unsafe fn(size: usize) -> *mut c_void;

unsafe fn c_alloc(size: usize) -> *mut c_void {
    unsafe {
        malloc(size)
    }
}

/**
 * Build the single `pam_response` carrying `password` and a NUL byte.
 *
 * Returns null when either allocation fails, in which case nothing
 * allocated here is left behind.
 */
unsafe fn pam_conv_reply(password: &[u8], alloc: Allocator) -> *mut pam_response {
    let reply = unsafe {
        alloc(mem::size_of::<pam_response>()) as *mut pam_response
    };
    
    if reply.is_null() {
        return ptr::null_mut();
    }
    
    let text = unsafe {
        alloc(password.len() + 1) as *mut u8
    };
    
    if text.is_null() {
        unsafe {
            free(reply as *mut c_void);
        }
        
        return ptr::null_mut();
    }
    
    unsafe {
        ptr::copy_nonoverlapping(password.as_ptr(), text, password.len());
        *text.add(password.len()) = 0;
        
        reply.write(pam_response {
            resp: text as *mut c_char,
            resp_retcode: 0
        });
    }
    
    reply
}

/**
 * Body of `pam_conv_password()`, with the allocator as a parameter.
 */
unsafe fn converse_with(
        num_msg: c_int, 
        msg: *mut *const pam_message, 
        resp: *mut *mut pam_response, 
        appdata_ptr: *mut c_void,
        alloc: Allocator) -> c_int {
        
    if appdata_ptr.is_null() || resp.is_null() {
        return PAM_CONV_ERR;
    }
    
    let conv = unsafe {
        &mut *(appdata_ptr as *mut PasswordConv<'_>)
    };
    
    let prompts = unsafe {
        read_prompts(num_msg, msg)
    };
    
    let password = match conv.answer(&prompts) {
        Ok(bytes) => bytes,
        Err(status) => return status.code()
    };
    
    let reply = unsafe {
        pam_conv_reply(password, alloc)
    };
    
    if reply.is_null() {
        conv.fail(Status::BUF_ERR);
        return PAM_BUF_ERR;
    }
    
    // PAM will free this later
    unsafe {
        *resp = reply;
    }
    
    PAM_SUCCESS
}

/**
 * Conversation callback registered with libpam.
 *
 * `appdata_ptr` must point to the `PasswordConv` bound by `password_conv()`.
 * A batch of exactly one prompt is answered with one `pam_response` whose
 * `resp` holds the password followed by a NUL byte. Both allocations are
 * made with `malloc()`, ownership passes to the caller (libpam frees them).
 *
 * Every other batch is rejected with `PAM_CONV_ERR` and `*resp` is left
 * untouched. Allocation failures return `PAM_BUF_ERR` without leaking.
 */
pub unsafe extern "C" fn pam_conv_password(
        num_msg: c_int, 
        msg: *mut *const pam_message, 
        resp: *mut *mut pam_response, 
        appdata_ptr: *mut c_void) -> c_int {
        
    unsafe {
        converse_with(num_msg, msg, resp, appdata_ptr, c_alloc)
    }
}

// -------------------------
// libpam backend
// -------------------------

#[cfg(feature = "use_pam")]
pub use self::libpam::{
    LibPam,
    PamHandle
};

#[cfg(feature = "use_pam")]
mod libpam {

    use super::*;
    use crate::modules::auth::{
        AuthFlags,
        Backend
    };
    
    use log::{
        debug,
        warn
    };
    
    use std::ffi::CString;
    use std::marker::PhantomData;

    mod c_ffi {    

        use libc::{
            c_int, 
            c_char
        };
        
        use super::super::{
            pam_conv,
            pam_handle_t
        };

        extern "C" {
            pub fn pam_start(service_name: *const c_char, user: *const c_char, 
                                pam_conversation: *const pam_conv, pamh: *mut *mut pam_handle_t) -> c_int;
                                
            pub fn pam_authenticate(pamh: *mut pam_handle_t, flags: c_int) -> c_int;
            pub fn pam_end(pamh: *mut pam_handle_t, pam_status: c_int) -> c_int;
        }
    }

    /**
     * The system PAM library.
     */
    #[derive(Debug, Default, Clone, Copy)]
    pub struct LibPam;

    /**
     * A libpam transaction handle.
     *
     * May be null when `pam_start()` failed before allocating one. The `'c`
     * borrow keeps the bound conversation in place until `pam_end()`.
     */
    pub struct PamHandle<'c> {
        handle: *mut pam_handle_t,
        _conv: PhantomData<&'c mut ()>
    }
    
    impl<'c> PamHandle<'c> {
        fn null() -> Self {
            PamHandle {
                handle: ptr::null_mut(),
                _conv: PhantomData
            }
        }
    }

    impl Backend for LibPam {
        type Handle<'c> = PamHandle<'c>;
        
        fn start<'c>(&self, service: &str, user: &str, conv: &'c mut PasswordConv<'_>) -> (PamHandle<'c>, Status) {
            let c_service = match CString::new(service) {
                Ok(s) => s,
                Err(_) => {
                    warn!("PAM service name contains a NUL byte");
                    return (PamHandle::null(), Status::SYSTEM_ERR);
                }
            };
            
            // No such account can exist
            let c_user = match CString::new(user) {
                Ok(s) => s,
                Err(_) => {
                    warn!("User name contains a NUL byte");
                    return (PamHandle::null(), Status::USER_UNKNOWN);
                }
            };
            
            // libpam copies the descriptor, only `conv` itself has to stay put
            let descriptor = password_conv(conv);
            let mut handle: *mut pam_handle_t = ptr::null_mut();
            
            let result = unsafe {
                c_ffi::pam_start(c_service.as_ptr(), c_user.as_ptr(), &descriptor, &mut handle)
            };
            
            (
                PamHandle {
                    handle: handle,
                    _conv: PhantomData
                },
                Status::from_code(result)
            )
        }
        
        fn authenticate(&self, handle: &mut PamHandle<'_>, flags: AuthFlags) -> Status {
            if handle.handle.is_null() {
                return Status::SYSTEM_ERR;
            }
        
            let result = unsafe {
                c_ffi::pam_authenticate(handle.handle, flags.bits())
            };
            
            Status::from_code(result)
        }
        
        fn end(&self, handle: PamHandle<'_>, last: Status) {
            if handle.handle.is_null() {
                return;
            }
            
            let result = unsafe { 
                c_ffi::pam_end(handle.handle, last.code())
            };
            
            if result != PAM_SUCCESS {
                debug!("pam_end returned {}", Status::from_code(result));
            }
        }
    }
    
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::conv::ConvState;
    use std::cell::Cell;
    use std::ffi::CString;

    /// Feed one prompt batch through the C callback, the way libpam would.
    fn converse(conv: &mut PasswordConv<'_>, count: usize) -> (c_int, *mut pam_response) {
        let text = CString::new(PROMPT).unwrap();
        let messages: Vec<pam_message> = (0..count)
            .map(|_| pam_message { msg_style: PAM_PROMPT_ECHO_OFF, msg: text.as_ptr() })
            .collect();
        let mut pointers: Vec<*const pam_message> = messages.iter().map(|m| m as *const pam_message).collect();
        let mut reply: *mut pam_response = ptr::null_mut();
        
        let descriptor = password_conv(conv);
        let callback = descriptor.conv.unwrap();
        let rc = unsafe {
            callback(count as c_int, pointers.as_mut_ptr(), &mut reply, descriptor.appdata_ptr)
        };
        
        (rc, reply)
    }
    
    /// Take ownership of a reply the way libpam does: copy out, then free.
    fn take_reply(reply: *mut pam_response) -> Vec<u8> {
        assert!(!reply.is_null());
        
        unsafe {
            let text = (*reply).resp;
            assert!(!text.is_null());
            assert_eq!((*reply).resp_retcode, 0);
            
            let bytes = CStr::from_ptr(text).to_bytes_with_nul().to_vec();
            free(text as *mut c_void);
            free(reply as *mut c_void);
            bytes
        }
    }
    
    const PROMPT: &str = "Password: ";

    #[test]
    fn single_prompt_copies_password_with_terminator() {
        let mut conv = PasswordConv::new("correct-pw");
        let (rc, reply) = converse(&mut conv, 1);
        
        assert_eq!(rc, PAM_SUCCESS);
        let bytes = take_reply(reply);
        assert_eq!(bytes, b"correct-pw\0");
        assert_eq!(bytes.len() - 1, "correct-pw".len());
        assert_eq!(conv.state(), ConvState::Answered);
    }
    
    #[test]
    fn empty_password_is_just_a_terminator() {
        let mut conv = PasswordConv::new("");
        let (rc, reply) = converse(&mut conv, 1);
        
        assert_eq!(rc, PAM_SUCCESS);
        assert_eq!(take_reply(reply), b"\0");
    }
    
    #[test]
    fn zero_prompts_are_rejected_without_reply() {
        let mut conv = PasswordConv::new("correct-pw");
        let (rc, reply) = converse(&mut conv, 0);
        
        assert_eq!(rc, PAM_CONV_ERR);
        assert!(reply.is_null());
        assert_eq!(conv.state(), ConvState::Failed(Status::CONV_ERR));
    }
    
    #[test]
    fn several_prompts_are_rejected_without_reply() {
        let mut conv = PasswordConv::new("correct-pw");
        let (rc, reply) = converse(&mut conv, 2);
        
        assert_eq!(rc, PAM_CONV_ERR);
        assert!(reply.is_null());
    }
    
    #[test]
    fn second_batch_is_rejected() {
        let mut conv = PasswordConv::new("correct-pw");
        
        let (rc, reply) = converse(&mut conv, 1);
        assert_eq!(rc, PAM_SUCCESS);
        take_reply(reply);
        
        let (rc, reply) = converse(&mut conv, 1);
        assert_eq!(rc, PAM_CONV_ERR);
        assert!(reply.is_null());
    }
    
    #[test]
    fn interior_nul_is_rejected() {
        let mut conv = PasswordConv::new("bad\0pw");
        let (rc, reply) = converse(&mut conv, 1);
        
        assert_eq!(rc, PAM_CONV_ERR);
        assert!(reply.is_null());
    }
    
    #[test]
    fn null_context_is_a_conversation_error() {
        let mut reply: *mut pam_response = ptr::null_mut();
        let rc = unsafe {
            pam_conv_password(0, ptr::null_mut(), &mut reply, ptr::null_mut())
        };
        
        assert_eq!(rc, PAM_CONV_ERR);
        assert!(reply.is_null());
    }
    
    #[test]
    fn null_message_pointer_still_counts_as_a_prompt() {
        let mut conv = PasswordConv::new("pw");
        let mut pointers: Vec<*const pam_message> = vec![ptr::null()];
        let mut reply: *mut pam_response = ptr::null_mut();
        let descriptor = password_conv(&mut conv);
        
        let rc = unsafe {
            pam_conv_password(1, pointers.as_mut_ptr(), &mut reply, descriptor.appdata_ptr)
        };
        
        assert_eq!(rc, PAM_SUCCESS);
        assert_eq!(take_reply(reply), b"pw\0");
    }
    
    thread_local! {
        static ALLOCATIONS_LEFT: Cell<usize> = Cell::new(0);
    }
    
    unsafe fn no_memory(_size: usize) -> *mut c_void {
        ptr::null_mut()
    }
    
    /// Serves `ALLOCATIONS_LEFT` allocations, then runs out.
    unsafe fn limited_memory(size: usize) -> *mut c_void {
        ALLOCATIONS_LEFT.with(|left| {
            if left.get() == 0 {
                return ptr::null_mut();
            }
            
            left.set(left.get() - 1);
            unsafe { malloc(size) }
        })
    }
    
    /// One prompt answered with the given allocator.
    fn converse_single(conv: &mut PasswordConv<'_>, alloc: Allocator) -> (c_int, *mut pam_response) {
        let text = CString::new(PROMPT).unwrap();
        let message = pam_message { msg_style: PAM_PROMPT_ECHO_OFF, msg: text.as_ptr() };
        let mut pointers: Vec<*const pam_message> = vec![&message as *const pam_message];
        let mut reply: *mut pam_response = ptr::null_mut();
        
        let descriptor = password_conv(conv);
        let rc = unsafe {
            converse_with(1, pointers.as_mut_ptr(), &mut reply, descriptor.appdata_ptr, alloc)
        };
        
        (rc, reply)
    }
    
    #[test]
    fn failed_reply_allocation_is_a_buffer_error() {
        let mut conv = PasswordConv::new("correct-pw");
        let (rc, reply) = converse_single(&mut conv, no_memory);
        
        assert_eq!(rc, PAM_BUF_ERR);
        assert!(reply.is_null());
        assert_eq!(conv.state(), ConvState::Failed(Status::BUF_ERR));
    }
    
    #[test]
    fn failed_text_allocation_is_a_buffer_error() {
        ALLOCATIONS_LEFT.with(|left| left.set(1));
        
        let mut conv = PasswordConv::new("correct-pw");
        let (rc, reply) = converse_single(&mut conv, limited_memory);
        
        assert_eq!(rc, PAM_BUF_ERR);
        assert!(reply.is_null());
        assert_eq!(conv.state(), ConvState::Failed(Status::BUF_ERR));
        assert_eq!(ALLOCATIONS_LEFT.with(Cell::get), 0);
    }
    
    #[test]
    fn buffer_error_is_not_an_authentication_error() {
        let mut conv = PasswordConv::new("correct-pw");
        let (rc, _) = converse_single(&mut conv, no_memory);
        
        assert_ne!(rc, PAM_AUTH_ERR);
        assert_eq!(Status::from_code(rc).into_result().unwrap_err().status(), Status::BUF_ERR);
    }
    
    #[test]
    fn enough_memory_gives_the_usual_reply() {
        ALLOCATIONS_LEFT.with(|left| left.set(2));
        
        let mut conv = PasswordConv::new("correct-pw");
        let (rc, reply) = converse_single(&mut conv, limited_memory);
        
        assert_eq!(rc, PAM_SUCCESS);
        assert_eq!(take_reply(reply), b"correct-pw\0");
    }
}
