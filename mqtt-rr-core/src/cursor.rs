//! Sequential playback cursor over a recording.
//!
//! Recordings have no index, so every reposition is a forward scan. Seeking
//! to a position at or before the current one rewinds to the start of the
//! file first.

use log::{debug, warn};
use std::io::{self, Read, Seek, SeekFrom};

use crate::error::FrameError;
use crate::frame::{Frame, FrameReader};

/// Reader with a logical playback position.
///
/// `recording_start_millis` is the timestamp of the first frame ever read and
/// stays fixed for the life of the cursor. `current_relative_millis` follows
/// every successful read and drops back to zero on rewind.
pub struct PlaybackCursor<R: Read + Seek> {
    reader: FrameReader<R>,
    recording_start_millis: Option<i64>,
    current_relative_millis: i64,
    /// Set once a malformed frame ended the stream; cleared by rewind
    exhausted: bool,
}

impl<R: Read + Seek> PlaybackCursor<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: FrameReader::new(reader),
            recording_start_millis: None,
            current_relative_millis: 0,
            exhausted: false,
        }
    }

    /// Timestamp of the first frame in the recording, once known
    pub fn recording_start_millis(&self) -> Option<i64> {
        self.recording_start_millis
    }

    /// Relative timestamp of the most recently read frame
    pub fn current_relative_millis(&self) -> i64 {
        self.current_relative_millis
    }

    /// Relative timestamp of an arbitrary frame from this recording
    pub fn relative_millis(&self, frame: &Frame) -> i64 {
        frame.message.captured_at_millis - self.recording_start_millis.unwrap_or(0)
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` at end of file and also for a malformed or truncated
    /// frame; only genuine I/O failures are errors.
    pub fn read_next(&mut self) -> io::Result<Option<Frame>> {
        if self.exhausted {
            return Ok(None);
        }

        match self.reader.next_frame() {
            Ok(Some(frame)) => {
                let start = *self
                    .recording_start_millis
                    .get_or_insert(frame.message.captured_at_millis);
                self.current_relative_millis = frame.message.captured_at_millis - start;
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(FrameError::Io(e)) => Err(e),
            Err(e) => {
                warn!("Unreadable frame treated as end of recording: {}", e);
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Fast-forward to the first frame whose relative time is `>= target_millis`.
    ///
    /// The landing frame is returned rather than discarded. `Ok(None)` means
    /// the recording ended before reaching the target.
    pub fn seek_to_relative_time(&mut self, target_millis: i64) -> io::Result<Option<Frame>> {
        // Frames at the current position may already be consumed
        if self.recording_start_millis.is_some() && target_millis <= self.current_relative_millis {
            self.rewind()?;
        }

        let mut skipped = 0u64;
        loop {
            match self.read_next()? {
                Some(frame) if self.current_relative_millis >= target_millis => {
                    debug!(
                        "Seek to {}ms landed at {}ms after skipping {} frames",
                        target_millis, self.current_relative_millis, skipped
                    );
                    return Ok(Some(frame));
                }
                Some(_) => skipped += 1,
                None => return Ok(None),
            }
        }
    }

    /// Seek to relative time zero, i.e. the first frame of the file
    pub fn restart_from_beginning(&mut self) -> io::Result<Option<Frame>> {
        self.seek_to_relative_time(0)
    }

    /// Reset to the beginning of the file
    pub fn rewind(&mut self) -> io::Result<()> {
        self.reader.get_mut().seek(SeekFrom::Start(0))?;
        self.current_relative_millis = 0;
        self.exhausted = false;
        Ok(())
    }
}
