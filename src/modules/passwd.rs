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
 * Password input for the `chkpasswd` front end.
 *
 * Reads a password either from the controlling terminal, with echo disabled
 * and each key masked by `*`, or from standard input. The result lives in a
 * `Zeroizing` buffer that is wiped when dropped. Intermediate buffers are
 * pre-sized and wiped as well.
 */

use super::shared::*;
use bitflags::bitflags;
use std::fmt;
use std::os::unix::io::RawFd;
use nix::errno::Errno;
use nix::libc::STDIN_FILENO;
use nix::sys::stat::Mode;

use zeroize::{
    Zeroize,
    Zeroizing
};

use nix::sys::termios::{
    SetArg, 
    LocalFlags, 
    Termios,
    tcsetattr, 
    tcgetattr
};
    
use nix::fcntl::{
    OFlag, 
    open
};
    
use nix::unistd::{
    close,
    read, 
    write
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct PromptFlags: u32 {
        const NONE = 0x00;
        const STDIN = 0x01;
        const HIDE = 0x02;
    }
}

#[derive(Debug)]
pub enum PasswdError {
    TtyOpen(Errno),
    TtyAttr(Errno),
    Read(Errno),
    TooLong,
    Utf8,
}

impl fmt::Display for PasswdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TtyOpen(e) => write!(f, "{}: {}", MSG_IO_TTY_OPEN, e),
            Self::TtyAttr(e) => write!(f, "{}: {}", MSG_IO_TTY_ATTR, e),
            Self::Read(e) => write!(f, "{}: {}", MSG_IO_READ, e),
            Self::TooLong => f.write_str(MSG_TOO_LONG),
            Self::Utf8 => f.write_str(MSG_PARSE_UTF8),
        }
    }
}

impl std::error::Error for PasswdError {}

/**
 * Read one line (up to `\n`, `\r` or end of input) into `buffer`.
 *
 * With `masked`, every accepted byte is echoed as `*` and backspace/DEL
 * remove the last byte, as on a terminal in non-canonical mode.
 *
 * The buffer never grows past its capacity. A longer line is still read
 * to its end, then reported as `PasswdError::TooLong`.
 */
fn read_line(input: RawFd, output: RawFd, masked: bool, buffer: &mut Vec<u8>) -> Result<(), PasswdError> {
    let mut ch: [u8; 1] = [0; 1];
    let mut overflow = false;
    
    let result = loop {
        match read(input, &mut ch) {
            Ok(0) => break Ok(()),
            Ok(_) if ch[0] == b'\r' || ch[0] == b'\n' => break Ok(()),
            
            Ok(_) if masked && (ch[0] == 127 || ch[0] == 8) => {
                if buffer.pop().is_some() {
                    write(output, b"\x08 \x08").ok();
                }
            }
            
            // Never grow, a reallocation would leave a copy behind
            Ok(_) if buffer.len() == buffer.capacity() => overflow = true,
            
            Ok(_) => {
                buffer.push(ch[0]);
                
                if masked {
                    write(output, b"*").ok();
                }
            }
            
            Err(Errno::EINTR) => continue,
            Err(e) => break Err(PasswdError::Read(e))
        }
    };
    
    ch.zeroize();
    
    match result {
        Ok(()) if overflow => Err(PasswdError::TooLong),
        other => other
    }
}

/**
 * Convert the collected bytes into the final password.
 */
fn into_password(buffer: &[u8]) -> Result<Zeroizing<String>, PasswdError> {
    let text = std::str::from_utf8(buffer).map_err(|_| PasswdError::Utf8)?;
    let mut password = Zeroizing::new(String::with_capacity(text.len()));
    password.push_str(text);
    
    Ok(password)
}

/**
 * Read a password from standard input, up to the first line break.
 */
pub fn read_password(input: RawFd) -> Result<Zeroizing<String>, PasswdError> {
    let mut buffer: Zeroizing<Vec<u8>> = Zeroizing::new(Vec::with_capacity(PASSWORD_MAX));
    
    read_line(input, input, false, &mut buffer)?;
    into_password(&buffer)
}

/**
 * Prompt the user for a password.
 *
 * With `PromptFlags::STDIN` the password is read from standard input and
 * `msg` is not shown. Otherwise `msg` is written to `/dev/tty` and the
 * password read back from it, with echo disabled when `PromptFlags::HIDE`
 * is set. Terminal settings are restored on every path.
 */
pub fn ask_password(msg: &str, flags: PromptFlags) -> Result<Zeroizing<String>, PasswdError> {
    if flags.contains(PromptFlags::STDIN) {
        return read_password(STDIN_FILENO);
    }
    
    let tty: RawFd = open(PATH_TTY, OFlag::O_RDWR | OFlag::O_NOCTTY, Mode::empty()).map_err(PasswdError::TtyOpen)?;
    let hide = flags.contains(PromptFlags::HIDE);
    let mut saved: Option<Termios> = None;
    
    if hide {
        let settings = match tcgetattr(tty) {
            Ok(settings) => settings,
            Err(e) => {
                close(tty).ok();
                return Err(PasswdError::TtyAttr(e));
            }
        };
        
        // Disable terminal ECHO mode
        let mut new_settings: Termios = settings.clone();
        new_settings.local_flags &= !(LocalFlags::ICANON | LocalFlags::ECHO);
        
        if let Err(e) = tcsetattr(tty, SetArg::TCSANOW, &new_settings) {
            close(tty).ok();
            return Err(PasswdError::TtyAttr(e));
        }
        
        saved = Some(settings);
    }
    
    let mut buffer: Zeroizing<Vec<u8>> = Zeroizing::new(Vec::with_capacity(PASSWORD_MAX));
    
    let result = write(tty, msg.as_bytes())
        .map_err(PasswdError::Read)
        .and_then(|_| read_line(tty, tty, hide, &mut buffer));
    
    // Reset the terminal
    if let Some(settings) = saved {
        write(tty, b"\n").ok();
        tcsetattr(tty, SetArg::TCSANOW, &settings).ok();
    }
    
    close(tty).ok();
    
    result?;
    into_password(&buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::pipe;

    fn pipe_with(data: &[u8]) -> RawFd {
        let (reader, writer) = pipe().unwrap();
        write(writer, data).unwrap();
        close(writer).unwrap();
        reader
    }

    #[test]
    fn reads_up_to_the_line_break() {
        let fd = pipe_with(b"correct-pw\nleftover");
        let password = read_password(fd).unwrap();
        close(fd).ok();
        
        assert_eq!(password.as_str(), "correct-pw");
    }
    
    #[test]
    fn end_of_input_terminates_the_password() {
        let fd = pipe_with(b"no-newline");
        let password = read_password(fd).unwrap();
        close(fd).ok();
        
        assert_eq!(password.as_str(), "no-newline");
    }
    
    #[test]
    fn empty_input_is_an_empty_password() {
        let fd = pipe_with(b"");
        let password = read_password(fd).unwrap();
        close(fd).ok();
        
        assert!(password.is_empty());
    }
    
    #[test]
    fn invalid_utf8_is_rejected() {
        let fd = pipe_with(b"\xff\xfe\n");
        let result = read_password(fd);
        close(fd).ok();
        
        assert!(matches!(result, Err(PasswdError::Utf8)));
    }
    
    #[test]
    fn input_is_capped_without_reallocating() {
        let mut buffer = Vec::with_capacity(PASSWORD_MAX);
        let capacity = buffer.capacity();
        let long = vec![b'x'; capacity + 10];
        let fd = pipe_with(&long);
        
        let result = read_line(fd, fd, false, &mut buffer);
        close(fd).ok();
        
        assert!(matches!(result, Err(PasswdError::TooLong)));
        assert_eq!(buffer.capacity(), capacity);
    }
    
    #[test]
    fn overlong_password_is_an_error() {
        let mut input = vec![b'x'; 600];
        input.push(b'\n');
        
        let fd = pipe_with(&input);
        let result = read_password(fd);
        close(fd).ok();
        
        assert!(matches!(result, Err(PasswdError::TooLong)));
    }
    
    #[test]
    fn overlong_line_is_drained_to_its_end() {
        let mut input = vec![b'x'; 600];
        input.extend_from_slice(b"\nnext\n");
        
        let fd = pipe_with(&input);
        let first = read_password(fd);
        let second = read_password(fd).unwrap();
        close(fd).ok();
        
        assert!(matches!(first, Err(PasswdError::TooLong)));
        assert_eq!(second.as_str(), "next");
    }
    
    #[test]
    fn password_at_the_cap_is_accepted() {
        let mut input = vec![b'x'; PASSWORD_MAX];
        input.push(b'\n');
        
        let fd = pipe_with(&input);
        let password = read_password(fd).unwrap();
        close(fd).ok();
        
        assert_eq!(password.len(), PASSWORD_MAX);
    }
}
