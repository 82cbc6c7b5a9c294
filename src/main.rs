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
 * chkpasswd: check a user's password against the system PAM stack.
 *
 * The password is read from the terminal (echo disabled) or from standard
 * input, then handed to a single PAM transaction for the configured service.
 * Nothing else happens: no account checks, no session, no credentials.
 *
 * ### Command Flow
 * ```text
 * chkpasswd  →  read password  →  Authorizer::authorize()  →  exit(status)
 * ```
 *
 * The exit code is 0 on success and the PAM status code otherwise, so
 * scripts can tell an unknown user (10) from a wrong password (7).
 */

#[macro_use]
extern crate chkpasswd;

use atty::Stream;
use chkpasswd::modules::shared::*;
use log::LevelFilter;
use std::env;

use chkpasswd::{
    AuthConfig,
    AuthFlags,
    Authorizer,
    LibPam,
    Status
};

use chkpasswd::modules::passwd::{
    ask_password,
    PromptFlags
};

use nix::unistd::{
    getuid,
    User
};

use getopts::{
    Options,
    Matches
};

/**
 * A structure to store available options
 */
#[derive(PartialEq, Eq)]
struct CliOption {
    flag: &'static str,
    name: &'static str,
    desc: &'static str,
    val:  &'static str
}

const OPT_USER    : CliOption  =  CliOption { flag: "u",   name: "user",            desc: "User to authenticate (default: USER or the current user)", val: "USER" };
const OPT_SERVICE : CliOption  =  CliOption { flag: "s",   name: "service",         desc: "PAM service to authenticate against",                      val: "NAME" };
const OPT_STDIN   : CliOption  =  CliOption { flag: "S",   name: "stdin",           desc: "Read password from standard input",                        val: EMPTY  };
const OPT_NONINT  : CliOption  =  CliOption { flag: "n",   name: "non-interactive", desc: "Non-interactive mode, don't prompt for password",          val: EMPTY  };
const OPT_SILENT  : CliOption  =  CliOption { flag: EMPTY, name: "silent",          desc: "Ask PAM modules not to emit messages",                     val: EMPTY  };
const OPT_NONULL  : CliOption  =  CliOption { flag: EMPTY, name: "no-null",         desc: "Reject empty passwords",                                   val: EMPTY  };
const OPT_QUIET   : CliOption  =  CliOption { flag: "q",   name: "quiet",           desc: "Do not print the outcome",                                 val: EMPTY  };
const OPT_DEBUG   : CliOption  =  CliOption { flag: "d",   name: "debug",           desc: "Enable debug logging",                                     val: EMPTY  };
const OPT_HELP    : CliOption  =  CliOption { flag: "h",   name: "help",            desc: "Display this help screen",                                 val: EMPTY  };
const OPT_VERSION : CliOption  =  CliOption { flag: "v",   name: "version",         desc: "Display version information and exit",                     val: EMPTY  };

const ARGV_SCHEME: &[CliOption] = &[OPT_USER, OPT_SERVICE, OPT_STDIN, OPT_NONINT, OPT_SILENT, OPT_NONULL, OPT_QUIET, OPT_DEBUG, OPT_HELP, OPT_VERSION];

/**
 * Prints the usage/help text based on the current command-line schema.
 */
fn print_usage(program: &str, argv_opt: &Options) {
    let brief: String = format!("Usage: {} [options] [USER]", program);
    print!("{}", argv_opt.usage(&brief));
}

/**
 * Build and return a configured `getopts::Options` parser
 * matching the static argument schema in `ARGV_SCHEME`.
 */
fn get_argv_options() -> Options {
    let mut argv_opt = Options::new();
    
    for cli_opt in ARGV_SCHEME {
        if cli_opt.val == EMPTY {
            argv_opt.optflag(cli_opt.flag, cli_opt.name, cli_opt.desc);
        
        } else {
            argv_opt.optopt(cli_opt.flag, cli_opt.name, cli_opt.desc, cli_opt.val);
        }
    }
    
    return argv_opt;
}

/**
 * `RUST_LOG` decides the level, `--debug` forces `debug`.
 */
fn init_logging(debug: bool) {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn")
    );
    
    if debug {
        builder.filter_level(LevelFilter::Debug);
    }
    
    builder.init();
}

fn current_user() -> Option<String> {
    User::from_uid(getuid()).ok().flatten().map(|user| user.name)
}

/**
 * Pick the account to authenticate.
 *
 * `--user` wins over the positional argument, `fallback` is only consulted
 * when neither was given.
 */
fn resolve_user<F>(opt: Option<String>, free: &[String], fallback: F) -> Option<String>
where
    F: FnOnce() -> Option<String>
{
    opt.or_else(|| free.first().cloned()).or_else(fallback)
}

/**
 * `-n` is only allowed when the password comes from standard input.
 */
fn can_read_password(nonint: bool, flags: PromptFlags) -> bool {
    !nonint || flags.contains(PromptFlags::STDIN)
}

/**
 * Map the final PAM status to a process exit code.
 *
 * Success is 0, every failure keeps its PAM code within 1..=255.
 */
fn exit_code(status: Status) -> i32 {
    if status.is_success() {
        0
    
    } else {
        status.code().clamp(1, 255)
    }
}

/**
 * Program entry point.
 *
 * 1. Parses command line arguments
 * 2. Reads the password
 * 3. Runs one PAM authentication
 * 4. Exits with the PAM status
 */
fn main() {
    let     argv_in:   Vec<String>    = env::args().collect();
    let     argv_opt:  Options        = get_argv_options();
    let     program:   &str           = env!("CARGO_PKG_NAME");
    let mut config:    AuthConfig     = AuthConfig::default();
    let mut flags:     PromptFlags    = PromptFlags::HIDE;
    let mut user:      Option<String> = None;
    let mut nonint:    bool           = false;
    let mut quiet:     bool           = false;
    let mut debug:     bool           = false;
    
    let argv_parsed: Matches = match argv_opt.parse(argv_in.iter().skip(1)) {
        Ok(m) => m,
        Err(e) => {
            print_usage(program, &argv_opt);
            errx!(1, e);
        }
    };
    
    for cli_opt in ARGV_SCHEME {
        if argv_parsed.opt_present(cli_opt.name) {
            match *cli_opt {
                OPT_HELP => {
                    print_usage(program, &argv_opt);
                    return;
                }
                
                OPT_VERSION => {
                    println!("{} {}", program, env!("CARGO_PKG_VERSION"));
                    return;
                }
            
                OPT_USER => {
                    user = argv_parsed.opt_str(cli_opt.name);
                }
                
                OPT_SERVICE => {
                    let cli_value: String = argv_parsed.opt_str(cli_opt.name).unwrap_or_else(|| {
                        errx!(1, "Service was not suplied");
                    });
                    
                    if cli_value.is_empty() {
                        errx!(1, "Service name cannot be empty");
                    }
                    
                    config.service = cli_value;
                }
                
                OPT_SILENT => config.flags |= AuthFlags::SILENT,
                OPT_NONULL => config.flags |= AuthFlags::DISALLOW_NULL_AUTHTOK,
                OPT_STDIN => flags |= PromptFlags::STDIN,
                OPT_NONINT => nonint = true,
                OPT_QUIET => quiet = true,
                OPT_DEBUG => debug = true,
                
                _ => ()
            }
        }
    }
    
    init_logging(debug);
    
    if argv_parsed.free.len() > 1 {
        print_usage(program, &argv_opt);
        errx!(1, "Expected at most one USER argument");
    }
    
    let user: String = resolve_user(user, &argv_parsed.free, current_user).unwrap_or_else(|| {
        errx!(1, "{}: {}", program, MSG_NO_USER);
    });
    
    // Piped input never gets a prompt
    if !atty::is(Stream::Stdin) {
        flags |= PromptFlags::STDIN;
    }
    
    if !can_read_password(nonint, flags) {
        errx!(1, "{}: {}", program, MSG_NO_PASSWORD);
    }
    
    let password = ask_password(PROMPT_TEXT, flags).unwrap_or_else(|e| {
        errx!(1, "{}: {}", program, e);
    });
    
    let authorizer = Authorizer::with_config(LibPam, config);
    let status = authorizer.authorize(&user, &password);
    
    // Scrub the password as soon as PAM is done with it
    drop(password);
    
    match status.into_result() {
        Ok(()) => {
            if !quiet {
                println!("{}: authentication succeeded for '{}'", program, user);
            }
        }
        
        Err(err) => {
            let code = exit_code(status);
            
            if quiet {
                errx!(code);
            }
            
            errx!(code, "{}: authentication failed for '{}': {}", program, user, err);
        }
    }
}
