//! Helpers for terminal interaction.

use std::io::{BufRead, Write};

use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg};

use crate::error::{Error, Result};

/// Returns whether stdin is a tty.
pub fn stdin_isatty() -> bool {
    nix::unistd::isatty(libc::STDIN_FILENO).unwrap_or(false)
}

/// Read a password from stdin with echo disabled, writing a query first.
///
/// When stdin is not a tty (pipes, tests) a plain line is read instead.
pub fn read_password(query: &str) -> Result<Vec<u8>> {
    let stdin = std::io::stdin();

    if !stdin_isatty() {
        let mut line = String::new();
        stdin
            .lock()
            .read_line(&mut line)
            .map_err(|err| Error::io("stdin", err))?;
        return Ok(trim_newline(line));
    }

    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(query.as_bytes());
    let _ = stdout.flush();

    let old_termios = tcgetattr(libc::STDIN_FILENO)
        .map_err(|errno| Error::io("stdin", std::io::Error::from_raw_os_error(errno as i32)))?;
    let mut raw = old_termios.clone();
    raw.local_flags.remove(LocalFlags::ECHO);
    tcsetattr(libc::STDIN_FILENO, SetArg::TCSANOW, &raw)
        .map_err(|errno| Error::io("stdin", std::io::Error::from_raw_os_error(errno as i32)))?;

    let mut line = String::new();
    let read_result = stdin.lock().read_line(&mut line);

    if tcsetattr(libc::STDIN_FILENO, SetArg::TCSANOW, &old_termios).is_err() {
        eprintln!("failed to reset terminal attributes!");
    }
    let _ = stdout.write_all(b"\n");
    let _ = stdout.flush();

    read_result.map_err(|err| Error::io("stdin", err))?;
    Ok(trim_newline(line))
}

/// Prompt twice and insist the entries match.
pub fn read_password_confirm(query: &str, confirm: &str) -> Result<Vec<u8>> {
    let first = read_password(query)?;
    let second = read_password(confirm)?;
    if first != second {
        return Err(Error::io(
            "stdin",
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "passphrases do not match"),
        ));
    }
    Ok(first)
}

fn trim_newline(mut line: String) -> Vec<u8> {
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    line.into_bytes()
}
