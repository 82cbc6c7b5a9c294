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
 * Non-interactive password conversation.
 *
 * A `PasswordConv` answers the prompts of one PAM transaction with a password
 * supplied up front. It is a small closed state machine:
 *
 * ```text
 * AwaitingPrompt --(batch of exactly one prompt)--> Answered
 * AwaitingPrompt --(any other batch)-------------> Failed(CONV_ERR)
 * Answered       --(any further batch)-----------> Failed(CONV_ERR)
 * Failed(s)      --(anything)--------------------> Failed(s)
 * ```
 *
 * Prompt text and style are never inspected, whatever the single prompt
 * asks for, the stored password is the answer.
 */

use crate::ffi::pam::{
    PAM_ERROR_MSG,
    PAM_PROMPT_ECHO_OFF,
    PAM_PROMPT_ECHO_ON,
    PAM_TEXT_INFO
};

use super::status::Status;
use libc::c_int;
use log::warn;
use std::fmt;

/**
 * Defines the message types emitted during PAM conversation callbacks.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStyle {
    EchoOff,
    EchoOn,
    ErrorMsg,
    TextInfo,
    Other(c_int)
}

impl MessageStyle {
    pub fn from_raw(style: c_int) -> Self {
        match style {
            PAM_PROMPT_ECHO_OFF => Self::EchoOff,
            PAM_PROMPT_ECHO_ON => Self::EchoOn,
            PAM_ERROR_MSG => Self::ErrorMsg,
            PAM_TEXT_INFO => Self::TextInfo,
            other => Self::Other(other)
        }
    }
    
    pub fn as_raw(self) -> c_int {
        match self {
            Self::EchoOff => PAM_PROMPT_ECHO_OFF,
            Self::EchoOn => PAM_PROMPT_ECHO_ON,
            Self::ErrorMsg => PAM_ERROR_MSG,
            Self::TextInfo => PAM_TEXT_INFO,
            Self::Other(raw) => raw
        }
    }
}

/**
 * One message of a prompt batch.
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub style: MessageStyle,
    pub text: String
}

impl Prompt {
    pub fn new<S: Into<String>>(style: MessageStyle, text: S) -> Self {
        Prompt {
            style,
            text: text.into()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvState {
    AwaitingPrompt,
    Answered,
    Failed(Status)
}

/**
 * Conversation bound to a borrowed password for the lifetime of one transaction.
 */
pub struct PasswordConv<'p> {
    password: &'p [u8],
    state: ConvState
}

impl<'p> PasswordConv<'p> {
    pub fn new(password: &'p str) -> Self {
        PasswordConv {
            password: password.as_bytes(),
            state: ConvState::AwaitingPrompt
        }
    }
    
    pub fn state(&self) -> ConvState {
        self.state
    }

    /**
     * Answer one prompt batch.
     *
     * Returns the password bytes (without terminator) when the batch holds
     * exactly one prompt and nothing has been answered yet. Any other batch
     * moves the conversation to `Failed` and returns the failure status.
     *
     * The returned slice borrows the caller's password, not `self`.
     */
    pub fn answer(&mut self, prompts: &[Prompt]) -> Result<&'p [u8], Status> {
        match self.state {
            ConvState::Failed(status) => Err(status),
            
            ConvState::Answered => {
                warn!("PAM conversation: unexpected second prompt batch");
                self.fail(Status::CONV_ERR);
                Err(Status::CONV_ERR)
            }
            
            ConvState::AwaitingPrompt if prompts.len() != 1 => {
                warn!("PAM conversation: expected exactly one prompt, got {}", prompts.len());
                self.fail(Status::CONV_ERR);
                Err(Status::CONV_ERR)
            }
            
            // Would be truncated at the first NUL on the C side
            ConvState::AwaitingPrompt if self.password.contains(&0) => {
                warn!("PAM conversation: password contains a NUL byte");
                self.fail(Status::CONV_ERR);
                Err(Status::CONV_ERR)
            }
            
            ConvState::AwaitingPrompt => {
                self.state = ConvState::Answered;
                Ok(self.password)
            }
        }
    }
    
    /**
     * Move to the terminal `Failed` state.
     */
    pub fn fail(&mut self, status: Status) {
        self.state = ConvState::Failed(status);
    }
}

impl fmt::Debug for PasswordConv<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordConv")
            .field("password", &"<redacted>")
            .field("state", &self.state)
            .finish()
    }
}
