//! Command dispatch
//!
//! Turns typed input, profile buttons and the interrupt key into framed
//! writes on the [`SerialLink`], and keeps the transcript plus the boundary
//! marker that isolates the output of the most recent command.

use super::framing::{frame, is_empty_frame, LineEnding};
use super::link::{LinkEvent, SerialLink};
use super::profile::CommandItem;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;

/// ASCII ETX, sent for Ctrl+C
pub const INTERRUPT_BYTE: u8 = 0x03;

/// Marker label recorded for an interrupt
pub const INTERRUPT_LABEL: &str = "interrupt";

/// Dispatch rejections
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// No open session
    #[error("Not connected. Connect to a serial port first.")]
    NotReady,

    /// Nothing to transmit (empty text, no line ending)
    #[error("Nothing to send")]
    EmptyPayload,
}

/// Where a command's output starts in the transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchMarker {
    /// Text sent, or [`INTERRUPT_LABEL`]
    pub command: String,
    /// Transcript length in bytes at dispatch time
    pub offset: usize,
    /// Set for interrupts
    pub interrupt: bool,
}

/// Text shown to the user: received data plus status notes
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    text: String,
}

impl Transcript {
    /// Empty transcript
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes, replacing invalid UTF-8
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.text.push_str(&String::from_utf8_lossy(data));
    }

    /// Append a status note on its own line
    pub fn push_note(&mut self, note: &str) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
        self.text.push_str(note);
        self.text.push('\n');
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.text.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Full contents
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.text.clear();
    }

    /// Text received after `offset`, trimmed of blank edges.
    ///
    /// An offset of zero or past the end (e.g. after a clear) gives nothing.
    pub fn since(&self, offset: usize) -> &str {
        if offset == 0 || offset > self.text.len() {
            return "";
        }
        self.text
            .get(offset..)
            .unwrap_or_default()
            .trim_matches(|c| matches!(c, '\n' | '\r' | ' '))
    }
}

#[derive(Default)]
struct DispatchState {
    transcript: Transcript,
    last: Option<DispatchMarker>,
}

/// Sends commands through a link and tracks what was sent last
pub struct CommandDispatcher {
    link: Arc<SerialLink>,
    state: Mutex<DispatchState>,
}

impl CommandDispatcher {
    /// Dispatcher over `link`
    pub fn new(link: Arc<SerialLink>) -> Self {
        Self {
            link,
            state: Mutex::new(DispatchState::default()),
        }
    }

    /// Underlying link
    pub fn link(&self) -> &Arc<SerialLink> {
        &self.link
    }

    /// Frame `text` with `ending` and write it
    pub fn send(&self, text: &str, ending: LineEnding) -> Result<DispatchMarker, DispatchError> {
        if is_empty_frame(text, ending) {
            return Err(DispatchError::EmptyPayload);
        }
        self.dispatch(&frame(text, ending), text, false)
    }

    /// Send a profile command
    pub fn send_command(
        &self,
        command: &CommandItem,
        ending: LineEnding,
    ) -> Result<DispatchMarker, DispatchError> {
        tracing::debug!("Dispatching '{}'", command.label);
        self.send(&command.text, ending)
    }

    /// Send ETX with no line ending
    pub fn send_interrupt(&self) -> Result<DispatchMarker, DispatchError> {
        self.dispatch(&[INTERRUPT_BYTE], INTERRUPT_LABEL, true)
    }

    fn dispatch(&self, payload: &[u8], command: &str, interrupt: bool) -> Result<DispatchMarker, DispatchError> {
        // The session can close between the check and the write
        if !self.link.is_open() || !self.link.write(payload) {
            return Err(DispatchError::NotReady);
        }

        let mut state = self.state.lock();
        let marker = DispatchMarker {
            command: command.to_string(),
            offset: state.transcript.len(),
            interrupt,
        };
        state.last = Some(marker.clone());
        Ok(marker)
    }

    /// Fold a link event into the transcript
    pub fn ingest(&self, event: &LinkEvent) {
        let mut state = self.state.lock();
        match event {
            LinkEvent::Connected => state.transcript.push_note("[Connected]"),
            LinkEvent::DataReceived(data) => state.transcript.push_bytes(data),
            LinkEvent::Error(e) => state.transcript.push_note(&format!("[Error] {e}")),
            LinkEvent::Disconnected => state.transcript.push_note("[Disconnected]"),
        }
    }

    /// Add a local status note
    pub fn note(&self, note: &str) {
        self.state.lock().transcript.push_note(note);
    }

    /// Marker of the last dispatched command
    pub fn last_marker(&self) -> Option<DispatchMarker> {
        self.state.lock().last.clone()
    }

    /// Output received since the last command, if any command was sent
    pub fn last_result(&self) -> Option<String> {
        let state = self.state.lock();
        let marker = state.last.as_ref()?;
        Some(state.transcript.since(marker.offset).to_string())
    }

    /// Snapshot of the transcript
    pub fn transcript(&self) -> String {
        self.state.lock().transcript.as_str().to_string()
    }

    /// Clear the transcript; the last marker stays but points past the end
    pub fn clear_transcript(&self) {
        self.state.lock().transcript.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::link::{LinkSettings, MockSerialBackend};
    use bytes::Bytes;

    fn idle_dispatcher() -> CommandDispatcher {
        let mut mock = MockSerialBackend::new();
        mock.expect_open().never();
        CommandDispatcher::new(Arc::new(SerialLink::new(Arc::new(mock), LinkSettings::default())))
    }

    #[test]
    fn test_rejects_when_not_open() {
        let dispatcher = idle_dispatcher();
        assert_eq!(dispatcher.send("AT", LineEnding::CrLf), Err(DispatchError::NotReady));
        assert_eq!(dispatcher.send_interrupt(), Err(DispatchError::NotReady));
        assert!(dispatcher.last_marker().is_none());
        assert!(dispatcher.link().events().try_recv().is_err());
    }

    #[test]
    fn test_empty_send_rejected_first() {
        let dispatcher = idle_dispatcher();
        assert_eq!(dispatcher.send("", LineEnding::None), Err(DispatchError::EmptyPayload));
    }

    #[test]
    fn test_transcript_since() {
        let mut t = Transcript::new();
        t.push_bytes(b"boot ok\r\n");
        let offset = t.len();
        t.push_bytes(b"\r\nOK\r\n ");
        assert_eq!(t.since(offset), "OK");
        assert_eq!(t.since(0), "");
        assert_eq!(t.since(500), "");
    }

    #[test]
    fn test_transcript_lossy_and_notes() {
        let mut t = Transcript::new();
        t.push_bytes(&[b'a', 0xFF]);
        t.push_note("[Connected]");
        assert_eq!(t.as_str(), "a\u{FFFD}\n[Connected]\n");
    }

    #[test]
    fn test_ingest_events() {
        let dispatcher = idle_dispatcher();
        dispatcher.ingest(&LinkEvent::Connected);
        dispatcher.ingest(&LinkEvent::DataReceived(Bytes::from_static(b"hi")));
        dispatcher.ingest(&LinkEvent::Disconnected);
        assert_eq!(dispatcher.transcript(), "[Connected]\nhi\n[Disconnected]\n");
        dispatcher.clear_transcript();
        assert!(dispatcher.transcript().is_empty());
        assert!(dispatcher.last_result().is_none());
    }
}
