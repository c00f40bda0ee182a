//! Begin/end markers framing one console command.
//!
//! The command goes out as one shell line: a `printf` printing
//! `__FLINT_BEGIN_<nonce>`, the command, then a `printf` printing
//! `__FLINT_END_<nonce>:<status>`. The terminal echo of that line and any
//! prompt in front of it arrive before the begin marker, so everything
//! between the two markers is command output. Each marker is split across
//! two quoted arguments, so the echoed line never contains the contiguous
//! marker. The nonce is fresh per command, which keeps late output from an
//! earlier, timed-out command from matching.
//!
//! Assumes a POSIX shell on the console (`printf`, `$?`). A trailing `#`
//! comment in the command would swallow the end marker.

const BEGIN_PREFIX: &str = "__FLINT_BEGIN_";
const END_PREFIX: &str = "__FLINT_END_";

#[derive(Debug, Clone)]
pub(crate) struct Sentinel {
    begin: String,
    end: String,
}

/// A complete frame located in the console buffer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Frame {
    pub output: String,
    pub exit_code: Option<i32>,
}

impl Sentinel {
    pub fn new() -> Self {
        Self::with_nonce(&uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn with_nonce(nonce: &str) -> Self {
        Self {
            begin: format!("{BEGIN_PREFIX}{nonce}"),
            end: format!("{END_PREFIX}{nonce}:"),
        }
    }

    fn nonce(&self) -> &str {
        &self.begin[BEGIN_PREFIX.len()..]
    }

    /// The single line to write to the console for `command_line`.
    pub fn script(&self, command_line: &str) -> String {
        let nonce = self.nonce();
        format!(
            "printf '%s%s\\n' '{BEGIN_PREFIX}' '{nonce}'; {command_line}; \
             printf '%s%s:%s\\n' '{END_PREFIX}' '{nonce}' \"$?\"\n"
        )
    }

    /// Look for a complete end marker in `buffer`.
    ///
    /// Returns `None` until the marker and its terminating newline have
    /// arrived.
    pub fn find_frame(&self, buffer: &[u8]) -> Option<Frame> {
        let end_at = find(buffer, self.end.as_bytes())?;
        let status_start = end_at + self.end.len();
        let line_len = buffer[status_start..].iter().position(|b| *b == b'\n')?;

        let status = String::from_utf8_lossy(&buffer[status_start..status_start + line_len]);
        let exit_code = status.trim().parse::<i32>().ok();

        Some(Frame {
            output: self.output_between(&buffer[..end_at]),
            exit_code,
        })
    }

    /// Output buffered so far, for diagnostics when no end marker arrived.
    ///
    /// Empty until the begin marker has been seen.
    pub fn partial(&self, buffer: &[u8]) -> String {
        self.output_between(buffer)
    }

    /// Everything after the begin marker line, without carriage returns.
    fn output_between(&self, buffer: &[u8]) -> String {
        let Some(at) = find(buffer, self.begin.as_bytes()) else {
            return String::new();
        };
        let after = at + self.begin.len();
        let start = buffer[after..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(buffer.len(), |nl| after + nl + 1);

        String::from_utf8_lossy(&buffer[start..]).replace('\r', "")
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
