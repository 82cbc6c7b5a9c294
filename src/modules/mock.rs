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
 * In-process stand-in for the system PAM library.
 *
 * `MockPam` implements `Backend` over a fixed table of accounts. It talks to
 * the conversation through the very same `pam_conv` descriptor and `extern "C"`
 * callback that libpam would receive, takes ownership of the returned
 * response and frees it with the C allocator, just like libpam does.
 *
 * Every `start`, `authenticate` and `end` is recorded as an `Event`, which
 * lets tests check the transaction lifecycle from the outside.
 */

use crate::ffi::pam::{
    pam_conv,
    pam_message,
    pam_response,
    password_conv,
    PAM_SUCCESS
};

use super::auth::{
    AuthFlags,
    Backend
};

use super::conv::{
    MessageStyle,
    PasswordConv,
    Prompt
};

use super::shared::PROMPT_TEXT;
use super::status::Status;
use libc::{c_int, c_void, free};
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::fmt;
use std::marker::PhantomData;
use std::ptr;

use std::sync::{
    Mutex,
    MutexGuard,
    PoisonError
};

/**
 * One call observed by the mock.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start { handle: u64, service: String, user: String, status: Status },
    Authenticate { handle: u64, flags: AuthFlags, status: Status },
    End { handle: u64, status: Status }
}

#[derive(Default)]
struct Ledger {
    next_handle: u64,
    events: Vec<Event>,
    responses: Vec<Vec<u8>>
}

/**
 * Transaction handle handed out by `MockPam`.
 *
 * Exists even when `start` failed, the same way libpam may leave a partially
 * set up handle behind that still has to go through `pam_end()`.
 */
pub struct MockHandle<'c> {
    id: u64,
    user: String,
    conv: pam_conv,
    _conv: PhantomData<&'c mut ()>
}

impl MockHandle<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/**
 * Test double for the external authentication service.
 */
pub struct MockPam {
    accounts: HashMap<String, String>,
    start_status: Option<Status>,
    prompts: Vec<Prompt>,
    rounds: usize,
    ledger: Mutex<Ledger>
}

impl Default for MockPam {
    fn default() -> Self {
        MockPam {
            accounts: HashMap::new(),
            start_status: None,
            prompts: vec![Prompt::new(MessageStyle::EchoOff, PROMPT_TEXT)],
            rounds: 1,
            ledger: Mutex::new(Ledger::default())
        }
    }
}

impl fmt::Debug for MockPam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut users: Vec<&str> = self.accounts.keys().map(String::as_str).collect();
        users.sort_unstable();
        
        // Passwords and recorded responses stay out of the output
        f.debug_struct("MockPam")
            .field("users", &users)
            .field("start_status", &self.start_status)
            .field("prompts", &self.prompts)
            .field("rounds", &self.rounds)
            .field("events", &self.ledger().events.len())
            .finish()
    }
}

impl MockPam {
    pub fn new() -> Self {
        Self::default()
    }
    
    /**
     * Accept `password` for `user`. Users not added here are unknown.
     */
    pub fn with_account(mut self, user: &str, password: &str) -> Self {
        self.accounts.insert(user.to_string(), password.to_string());
        self
    }
    
    /**
     * Make every `start` report `status`.
     */
    pub fn fail_start(mut self, status: Status) -> Self {
        self.start_status = Some(status);
        self
    }
    
    /**
     * Prompt batch sent in each conversation round (default: one echo-off password prompt).
     */
    pub fn with_prompts(mut self, prompts: Vec<Prompt>) -> Self {
        self.prompts = prompts;
        self
    }
    
    /**
     * Number of conversation rounds per `authenticate` (default: 1).
     */
    pub fn with_rounds(mut self, rounds: usize) -> Self {
        self.rounds = rounds;
        self
    }
    
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
    
    pub fn events(&self) -> Vec<Event> {
        self.ledger().events.clone()
    }
    
    /**
     * Every response received from the conversation, as raw bytes including the NUL terminator.
     */
    pub fn responses(&self) -> Vec<Vec<u8>> {
        self.ledger().responses.clone()
    }
    
    pub fn starts(&self) -> usize {
        self.count(|e| matches!(e, Event::Start { .. }))
    }
    
    pub fn authentications(&self) -> usize {
        self.count(|e| matches!(e, Event::Authenticate { .. }))
    }
    
    pub fn ends(&self) -> usize {
        self.count(|e| matches!(e, Event::End { .. }))
    }
    
    fn count<F: Fn(&Event) -> bool>(&self, f: F) -> usize {
        self.ledger().events.iter().filter(|&e| f(e)).count()
    }
    
    fn verdict(&self, user: &str, response: Option<&[u8]>) -> Status {
        let Some(known) = self.accounts.get(user) else {
            return Status::USER_UNKNOWN;
        };
        
        match response {
            None => Status::CONV_ERR,
            Some(bytes) if bytes.strip_suffix(b"\0") == Some(known.as_bytes()) => Status::SUCCESS,
            Some(_) => Status::AUTH_ERR
        }
    }
}

/**
 * Run one conversation round the way libpam does.
 *
 * Returns the responses (with terminator) the callback produced, or the
 * status it failed with. Response memory is freed here, as the owner.
 */
fn converse(conv: &pam_conv, prompts: &[Prompt]) -> Result<Vec<Option<Vec<u8>>>, Status> {
    let Some(callback) = conv.conv else {
        return Err(Status::CONV_ERR);
    };
    
    let texts: Vec<CString> = prompts
        .iter()
        .map(|p| CString::new(p.text.as_str()).unwrap_or_default())
        .collect();
        
    let messages: Vec<pam_message> = prompts
        .iter()
        .zip(&texts)
        .map(|(p, text)| pam_message { msg_style: p.style.as_raw(), msg: text.as_ptr() })
        .collect();
        
    let mut pointers: Vec<*const pam_message> = messages
        .iter()
        .map(|m| m as *const pam_message)
        .collect();
        
    let mut reply: *mut pam_response = ptr::null_mut();
    
    let result = unsafe {
        callback(prompts.len() as c_int, pointers.as_mut_ptr(), &mut reply, conv.appdata_ptr)
    };
    
    if result != PAM_SUCCESS {
        return Err(Status::from_code(result));
    }
    
    if reply.is_null() {
        return Ok(Vec::new());
    }
    
    let mut responses = Vec::with_capacity(prompts.len());
    
    for i in 0..prompts.len() {
        unsafe {
            let entry = &mut *reply.add(i);
            
            if entry.resp.is_null() {
                responses.push(None);
                
            } else {
                responses.push(Some(CStr::from_ptr(entry.resp).to_bytes_with_nul().to_vec()));
                free(entry.resp as *mut c_void);
                entry.resp = ptr::null_mut();
            }
        }
    }
    
    unsafe {
        free(reply as *mut c_void);
    }
    
    Ok(responses)
}

impl Backend for MockPam {
    type Handle<'c> = MockHandle<'c>;

    fn start<'c>(&self, service: &str, user: &str, conv: &'c mut PasswordConv<'_>) -> (MockHandle<'c>, Status) {
        let status = self.start_status.unwrap_or(Status::SUCCESS);
        let mut ledger = self.ledger();
        
        ledger.next_handle += 1;
        let id = ledger.next_handle;
        
        ledger.events.push(Event::Start {
            handle: id,
            service: service.to_string(),
            user: user.to_string(),
            status
        });
        
        (
            MockHandle {
                id,
                user: user.to_string(),
                conv: password_conv(conv),
                _conv: PhantomData
            },
            status
        )
    }
    
    fn authenticate(&self, handle: &mut MockHandle<'_>, flags: AuthFlags) -> Status {
        let mut answer: Option<Vec<u8>> = None;
        let mut status = Status::SUCCESS;
        let mut received = Vec::new();
        
        for _ in 0..self.rounds {
            match converse(&handle.conv, &self.prompts) {
                Ok(responses) => {
                    for response in responses.into_iter().flatten() {
                        if answer.is_none() {
                            answer = Some(response.clone());
                        }
                        
                        received.push(response);
                    }
                }
                
                Err(error) => {
                    status = error;
                    break;
                }
            }
        }
        
        if status.is_success() {
            status = self.verdict(&handle.user, answer.as_deref());
        }
        
        let mut ledger = self.ledger();
        ledger.responses.extend(received);
        ledger.events.push(Event::Authenticate {
            handle: handle.id,
            flags,
            status
        });
        
        status
    }
    
    fn end(&self, handle: MockHandle<'_>, last: Status) {
        self.ledger().events.push(Event::End {
            handle: handle.id,
            status: last
        });
    }
}
