//! The external helper process backend.
//!
//! This backend delegates symbolization to a separate, long-lived helper
//! binary (`llvm-symbolizer` compatible) spoken to over pipes. The helper
//! is spawned lazily on first use; one request is in flight at a time and
//! the calling thread blocks until the response arrives. A helper that
//! exits or whose pipe breaks is never restarted: the backend goes defunct
//! for the rest of the process.
//!
//! The wire protocol is an internal contract between this crate and its
//! helper, one line-delimited request per lookup:
//!
//! ```text
//! CODE <module> <offset-hex>\n
//! DATA <module> <offset-hex>\n
//! ```
//!
//! A code response consists of zero or more pairs of lines, one function
//! name line followed by one `file:line:column` line per (possibly
//! inlined) frame, terminated by a single empty line. A data response
//! consists of a symbol name line and a `start size` line, terminated the
//! same way. `??` placeholders denote unknown components; a malformed
//! response is treated as "no match", never as an error visible to the
//! caller.

use std::borrow::Cow;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Error;
use std::io::ErrorKind;
use std::io::Result;
use std::io::Write as _;
use std::mem;
use std::path::Path;
use std::path::PathBuf;
use std::process::Child;
use std::process::ChildStdin;
use std::process::ChildStdout;
use std::process::Command;
use std::process::Stdio;
use std::sync::Mutex;

use crate::log::debug;
use crate::log::warn;
use crate::symbolize::AddressInfo;
use crate::symbolize::DataInfo;
use crate::util::is_executable;
use crate::Addr;

use super::Backend;


#[derive(Debug)]
struct Helper {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// Reused response line buffer.
    line: String,
}


#[derive(Debug)]
enum State {
    /// The helper has not been spawned yet.
    Idle,
    /// The helper is running.
    Active(Helper),
    /// The helper failed to spawn or died; it is never restarted.
    Defunct,
}


fn spawn(path: &Path) -> Result<Helper> {
    let mut child = Command::new(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::new(ErrorKind::BrokenPipe, "helper stdin was not captured"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::new(ErrorKind::BrokenPipe, "helper stdout was not captured"))?;

    let helper = Helper {
        child,
        stdin,
        stdout: BufReader::new(stdout),
        line: String::new(),
    };
    Ok(helper)
}


fn read_line<'line, R>(reader: &mut R, line: &'line mut String) -> Result<&'line str>
where
    R: BufRead,
{
    let () = line.clear();
    if reader.read_line(line)? == 0 {
        return Err(Error::new(
            ErrorKind::UnexpectedEof,
            "helper closed its output",
        ))
    }
    Ok(line.trim())
}


/// Parse a `file:line:column` location, tolerating the column-less
/// `file:line` form some helpers emit.
fn parse_code_location(location: &str) -> Option<(&str, u32, u32)> {
    let (rest, last) = location.rsplit_once(':')?;
    let last_num = last.parse::<u32>().ok()?;
    if let Some((file, mid)) = rest.rsplit_once(':') {
        if let Ok(mid_num) = mid.parse::<u32>() {
            return Some((file, mid_num, last_num))
        }
    }
    Some((rest, last_num, 0))
}


/// Read one blank-line-terminated code response, filling up to
/// `frames.len()` records. The full response is consumed even when it
/// contains more frames than fit. Frames whose every component is a `??`
/// placeholder are the helper's way of saying "no match" and are skipped.
fn read_code_response<R>(
    reader: &mut R,
    line: &mut String,
    frames: &mut [AddressInfo],
) -> Result<usize>
where
    R: BufRead,
{
    let mut filled = 0;
    let mut malformed = false;

    loop {
        let function = read_line(reader, line)?;
        if function.is_empty() {
            break
        }
        let function_known = function != "??";
        let slot = filled < frames.len();
        if slot {
            // The line buffer is reused for the location line, so the
            // function name is copied out right away.
            let frame = &mut frames[filled];
            let () = frame.clear();
            if function_known {
                let () = frame.set_function(function);
            }
        }

        let location = read_line(reader, line)?;
        if location.is_empty() {
            // A function line without a location line; the blank we just
            // consumed was the response terminator.
            if slot {
                let () = frames[filled].clear();
            }
            malformed = true;
            break
        }

        let mut location_known = false;
        if slot && location != "??" && location != "??:0" && location != "??:0:0" {
            if let Some((file, line_no, column)) = parse_code_location(location) {
                let frame = &mut frames[filled];
                if file != "??" {
                    let () = frame.set_file(file);
                    location_known = true;
                }
                frame.line = line_no;
                frame.column = column;
                location_known |= line_no != 0;
            } else {
                malformed = true;
            }
        }

        if slot {
            if function_known || location_known {
                filled += 1;
            } else {
                let () = frames[filled].clear();
            }
        }
    }

    if malformed {
        for frame in &mut frames[..filled] {
            let () = frame.clear();
        }
        return Ok(0)
    }
    Ok(filled)
}


fn parse_extent_num(num: &str) -> Option<u64> {
    match num.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => num.parse().ok(),
    }
}


/// Read one blank-line-terminated data response into `info`. The reported
/// `start` is relative to the image base.
fn read_data_response<R>(reader: &mut R, line: &mut String, info: &mut DataInfo) -> Result<bool>
where
    R: BufRead,
{
    let name = read_line(reader, line)?;
    if name.is_empty() {
        return Ok(false)
    }
    let mut found = name != "??";
    if found {
        let () = info.set_name(name);
    }

    let extent = read_line(reader, line)?;
    if extent.is_empty() {
        // Name line without an extent line; already at the terminator.
        let () = info.clear();
        return Ok(false)
    }
    let mut tokens = extent.split_whitespace();
    match (
        tokens.next().and_then(parse_extent_num),
        tokens.next().and_then(parse_extent_num),
    ) {
        (Some(start), Some(size)) => {
            info.start = start;
            info.size = size;
        }
        _ => found = false,
    }

    // Consume up to and including the response terminator.
    loop {
        if read_line(reader, line)?.is_empty() {
            break
        }
        found = false;
    }

    if !found {
        let () = info.clear();
    }
    Ok(found)
}


/// The backend delegating to an external helper process.
#[derive(Debug)]
pub(crate) struct ExternalBackend {
    path: PathBuf,
    state: Mutex<State>,
}

impl ExternalBackend {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: Mutex::new(State::Idle),
        }
    }

    /// Retrieve the running helper, spawning it on first use.
    fn active<'state>(&self, state: &'state mut State) -> Option<&'state mut Helper> {
        if let State::Idle = state {
            *state = match spawn(&self.path) {
                Ok(helper) => {
                    debug!("spawned symbolization helper {}", self.path.display());
                    State::Active(helper)
                }
                Err(err) => {
                    warn!(
                        "failed to spawn symbolization helper {}: {err}",
                        self.path.display()
                    );
                    State::Defunct
                }
            };
        }

        match state {
            State::Active(helper) => Some(helper),
            _ => None,
        }
    }

    /// Terminate the helper, if running, and mark the backend defunct.
    fn retire(state: &mut State) {
        if let State::Active(mut helper) = mem::replace(state, State::Defunct) {
            let _result = helper.child.kill();
            let _status = helper.child.wait();
        }
    }

    fn request_code(helper: &mut Helper, module: &str, offset: u64, frames: &mut [AddressInfo]) -> Result<usize> {
        let () = writeln!(helper.stdin, "CODE {module} {offset:#x}")?;
        let () = helper.stdin.flush()?;
        read_code_response(&mut helper.stdout, &mut helper.line, frames)
    }

    fn request_data(helper: &mut Helper, module: &str, offset: u64, info: &mut DataInfo) -> Result<bool> {
        let () = writeln!(helper.stdin, "DATA {module} {offset:#x}")?;
        let () = helper.stdin.flush()?;
        read_data_response(&mut helper.stdout, &mut helper.line, info)
    }
}

impl Backend for ExternalBackend {
    fn symbolize_code(
        &self,
        _addr: Addr,
        module: &str,
        offset: u64,
        frames: &mut [AddressInfo],
    ) -> usize {
        let mut state = self.state.lock().unwrap();
        let Some(helper) = self.active(&mut state) else {
            return 0
        };

        match Self::request_code(helper, module, offset, frames) {
            Ok(count) => count,
            Err(err) => {
                warn!("symbolization helper request failed: {err}");
                let () = Self::retire(&mut state);
                for frame in frames.iter_mut() {
                    let () = frame.clear();
                }
                0
            }
        }
    }

    fn symbolize_data(&self, _addr: Addr, module: &str, offset: u64, info: &mut DataInfo) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(helper) = self.active(&mut state) else {
            return false
        };

        match Self::request_data(helper, module, offset, info) {
            Ok(found) => found,
            Err(err) => {
                warn!("symbolization helper request failed: {err}");
                let () = Self::retire(&mut state);
                let () = info.clear();
                false
            }
        }
    }

    fn demangle<'sym>(&self, _name: &'sym str) -> Option<Cow<'sym, str>> {
        None
    }

    fn flush(&self) {
        // The helper owns its caches; nothing to drop on this side and the
        // process is deliberately kept alive.
    }

    fn is_available(&self) -> bool {
        match *self.state.lock().unwrap() {
            State::Idle => is_executable(&self.path),
            State::Active(..) => true,
            State::Defunct => false,
        }
    }

    fn is_external(&self) -> bool {
        true
    }

    fn prepare_for_sandboxing(&self) {
        let mut state = self.state.lock().unwrap();
        let () = Self::retire(&mut state);
    }
}
