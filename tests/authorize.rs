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

use chkpasswd::{
    AuthConfig,
    AuthError,
    Authorizer,
    Event,
    MessageStyle,
    MockPam,
    Prompt,
    Status
};

use std::collections::HashSet;
use std::thread;

fn double() -> MockPam {
    MockPam::new().with_account("alice", "correct-pw")
}

/// (started, ended) handle ids, in call order
fn lifecycle(events: &[Event]) -> (Vec<u64>, Vec<u64>) {
    let started = events
        .iter()
        .filter_map(|e| match e {
            Event::Start { handle, .. } => Some(*handle),
            _ => None
        })
        .collect();
        
    let ended = events
        .iter()
        .filter_map(|e| match e {
            Event::End { handle, .. } => Some(*handle),
            _ => None
        })
        .collect();
        
    (started, ended)
}

#[test]
fn alice_with_the_right_password() {
    let auth = Authorizer::new(double());
    
    assert_eq!(auth.authorize("alice", "correct-pw"), Status::SUCCESS);
    assert_eq!(auth.backend().responses(), vec![b"correct-pw\0".to_vec()]);
}

#[test]
fn failures_are_distinguishable() {
    let auth = Authorizer::new(double());
    
    let wrong = auth.authorize("alice", "wrong-pw");
    let unknown = auth.authorize("bob", "anything");
    
    assert_eq!(wrong, Status::AUTH_ERR);
    assert_eq!(unknown, Status::USER_UNKNOWN);
    assert_ne!(wrong, unknown);
}

#[test]
fn every_rejection_releases_its_handle_once() {
    let auth = Authorizer::new(double());
    
    for (user, password) in [("alice", "wrong-pw"), ("bob", "anything"), ("", "correct-pw")] {
        assert!(!auth.authorize(user, password).is_success());
    }
    
    let (started, ended) = lifecycle(&auth.backend().events());
    assert_eq!(started, vec![1, 2, 3]);
    assert_eq!(ended, vec![1, 2, 3]);
}

#[test]
fn start_failure_never_authenticates() {
    let auth = Authorizer::new(double().fail_start(Status::BUF_ERR));
    
    assert_eq!(auth.authorize("alice", "correct-pw"), Status::BUF_ERR);
    assert_eq!(auth.authorize_user("alice", "correct-pw"), Err(AuthError::Failed(Status::BUF_ERR)));
    
    let backend = auth.backend();
    assert_eq!(backend.authentications(), 0);
    assert_eq!(backend.ends(), 2);
    assert!(backend
        .events()
        .iter()
        .all(|e| !matches!(e, Event::End { status, .. } if *status != Status::BUF_ERR)));
}

#[test]
fn several_prompts_in_one_batch_are_a_conversation_error() {
    let prompts = vec![
        Prompt::new(MessageStyle::EchoOn, "login: "),
        Prompt::new(MessageStyle::EchoOff, "Password: "),
    ];
    let auth = Authorizer::new(double().with_prompts(prompts));
    
    assert_eq!(auth.authorize("alice", "correct-pw"), Status::CONV_ERR);
    assert!(auth.backend().responses().is_empty());
    assert_eq!(auth.backend().ends(), 1);
}

#[test]
fn an_empty_batch_is_a_conversation_error() {
    let auth = Authorizer::new(double().with_prompts(Vec::new()));
    
    assert_eq!(auth.authorize("alice", "correct-pw"), Status::CONV_ERR);
    assert!(auth.backend().responses().is_empty());
}

#[test]
fn a_second_round_is_rejected() {
    let auth = Authorizer::new(double().with_rounds(2));
    
    assert_eq!(auth.authorize("alice", "correct-pw"), Status::CONV_ERR);
    assert_eq!(auth.backend().responses().len(), 1);
}

#[test]
fn each_call_gets_a_fresh_conversation() {
    let auth = Authorizer::new(double());
    
    // A reused conversation would already be in the answered state
    assert_eq!(auth.authorize("alice", "correct-pw"), Status::SUCCESS);
    assert_eq!(auth.authorize("alice", "correct-pw"), Status::SUCCESS);
}

#[test]
fn the_policy_name_is_injected() {
    let auth = Authorizer::with_config(double(), AuthConfig::new("test-policy"));
    auth.authorize("alice", "correct-pw");
    
    assert!(matches!(
        &auth.backend().events()[0],
        Event::Start { service, .. } if service == "test-policy"
    ));
}

#[test]
fn mixed_calls_pair_every_open_with_a_close() {
    let auth = Authorizer::new(double().with_account("carol", "s3cret"));
    let attempts = [
        ("alice", "correct-pw"),
        ("alice", "nope"),
        ("carol", "s3cret"),
        ("dave", "x"),
        ("carol", "correct-pw"),
    ];
    
    for (user, password) in attempts {
        auth.authorize(user, password);
    }
    
    let backend = auth.backend();
    let (started, ended) = lifecycle(&backend.events());
    let unique: HashSet<u64> = started.iter().copied().collect();
    
    assert_eq!(backend.starts(), attempts.len());
    assert_eq!(backend.ends(), attempts.len());
    assert_eq!(unique.len(), attempts.len());
    assert_eq!(started, ended);
}

#[test]
fn concurrent_calls_use_separate_transactions() {
    let auth = Authorizer::new(double());
    
    thread::scope(|s| {
        for i in 0..8 {
            let auth = &auth;
            s.spawn(move || {
                let password = if i % 2 == 0 { "correct-pw" } else { "wrong-pw" };
                let expected = if i % 2 == 0 { Status::SUCCESS } else { Status::AUTH_ERR };
                
                assert_eq!(auth.authorize("alice", password), expected);
            });
        }
    });
    
    let backend = auth.backend();
    let (started, mut ended) = lifecycle(&backend.events());
    ended.sort_unstable();
    
    assert_eq!(started.len(), 8);
    assert_eq!(ended, (1..=8).collect::<Vec<u64>>());
}
