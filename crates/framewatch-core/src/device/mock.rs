//! In-memory byte source
//!
//! Clones share state, so a test keeps one handle to script traffic and
//! unplug devices while the monitor owns another.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ByteSource, DeviceError, SerialParams};

#[derive(Debug, Default)]
struct MockState {
    devices: Vec<String>,
    open: Option<SerialParams>,
    incoming: VecDeque<Vec<u8>>,
    read_failures: usize,
    open_failures: usize,
    writes: Vec<Vec<u8>>,
    opens: Vec<SerialParams>,
}

/// Scripted byte source for tests and demos
#[derive(Debug, Clone, Default)]
pub struct MockByteSource {
    state: Arc<Mutex<MockState>>,
}

impl MockByteSource {
    /// Source with the given devices present
    pub fn new<I, S>(devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let source = Self::default();
        source.lock().devices = devices.into_iter().map(Into::into).collect();
        source
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a chunk to be returned by the next read
    pub fn push_incoming(&self, chunk: impl Into<Vec<u8>>) {
        self.lock().incoming.push_back(chunk.into());
    }

    /// Make the next `count` reads fail with an I/O error
    pub fn fail_reads(&self, count: usize) {
        self.lock().read_failures = count;
    }

    /// Make the next `count` opens fail
    pub fn fail_opens(&self, count: usize) {
        self.lock().open_failures = count;
    }

    /// Remove a device; reads from it fail until it is opened again
    pub fn unplug(&self, port: &str) {
        self.lock().devices.retain(|d| d != port);
    }

    /// Make a device present
    pub fn plug(&self, port: &str) {
        let mut state = self.lock();
        if !state.devices.iter().any(|d| d == port) {
            state.devices.push(port.to_string());
        }
    }

    /// Everything written so far
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Parameters of every successful open, in order
    pub fn opens(&self) -> Vec<SerialParams> {
        self.lock().opens.clone()
    }
}

impl ByteSource for MockByteSource {
    fn open(&mut self, params: &SerialParams) -> Result<(), DeviceError> {
        let mut state = self.lock();
        if !state.devices.contains(&params.port) {
            return Err(DeviceError::PortNotFound(params.port.clone()));
        }
        if state.open_failures > 0 {
            state.open_failures -= 1;
            return Err(DeviceError::OpenFailed {
                port: params.port.clone(),
                reason: "injected failure".into(),
            });
        }
        state.open = Some(params.clone());
        state.opens.push(params.clone());
        Ok(())
    }

    fn close(&mut self) {
        self.lock().open = None;
    }

    fn is_open(&self) -> bool {
        self.lock().open.is_some()
    }

    fn read_available(&mut self) -> Result<Vec<u8>, DeviceError> {
        let mut state = self.lock();
        let port = match &state.open {
            Some(params) => params.port.clone(),
            None => return Err(DeviceError::NotOpen),
        };

        if state.read_failures > 0 {
            state.read_failures -= 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "injected read failure").into());
        }
        if !state.devices.contains(&port) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "device removed").into());
        }

        Ok(state.incoming.pop_front().unwrap_or_default())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        match &state.open {
            Some(params) if state.devices.contains(&params.port) => {
                state.writes.push(bytes.to_vec());
                Ok(())
            }
            Some(_) => Err(io::Error::new(io::ErrorKind::NotConnected, "device removed").into()),
            None => Err(DeviceError::NotOpen),
        }
    }

    fn enumerate(&self) -> Vec<String> {
        self.lock().devices.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_reads() {
        let mut source = MockByteSource::new(["COM1"]);
        assert!(matches!(source.read_available(), Err(DeviceError::NotOpen)));

        source.open(&SerialParams::new("COM1")).unwrap();
        source.push_incoming(vec![1, 2]);
        assert_eq!(source.read_available().unwrap(), vec![1, 2]);
        assert!(source.read_available().unwrap().is_empty());
    }

    #[test]
    fn test_unplug_breaks_reads() {
        let mut source = MockByteSource::new(["COM1"]);
        let handle = source.clone();
        source.open(&SerialParams::new("COM1")).unwrap();

        handle.unplug("COM1");
        assert!(source.enumerate().is_empty());
        assert!(matches!(source.read_available(), Err(DeviceError::Io(_))));
        assert!(matches!(
            source.open(&SerialParams::new("COM1")),
            Err(DeviceError::PortNotFound(_))
        ));
    }

    #[test]
    fn test_writes_recorded() {
        let mut source = MockByteSource::new(["COM1"]);
        source.open(&SerialParams::new("COM1")).unwrap();
        source.write(&[0xAA]).unwrap();
        assert_eq!(source.writes(), vec![vec![0xAA]]);
    }
}
