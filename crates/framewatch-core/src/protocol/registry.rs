//! Protocol registry and chunk dispatcher

use std::collections::HashSet;

use chrono::{DateTime, Local};

use super::{Frame, FrameSynchronizer, ProtocolDefinition, ProtocolError, SyncStats};

/// Routes received chunks to the built-in synchronizer and every enabled
/// custom synchronizer.
///
/// While any enabled custom protocol uses the built-in header (`A8 A8`), the
/// built-in synchronizer is not fed at all. Custom synchronizers are always
/// fed. Frames are returned built-in first, then custom in definition order.
#[derive(Debug, Clone)]
pub struct ProtocolRegistry {
    builtin: FrameSynchronizer,
    definitions: Vec<ProtocolDefinition>,
    custom: Vec<FrameSynchronizer>,
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self {
            builtin: FrameSynchronizer::builtin(),
            definitions: Vec::new(),
            custom: Vec::new(),
        }
    }
}

impl ProtocolRegistry {
    /// Build a registry from custom definitions
    pub fn new(definitions: Vec<ProtocolDefinition>) -> Result<Self, ProtocolError> {
        let mut registry = Self::default();
        registry.set_definitions(definitions)?;
        Ok(registry)
    }

    /// Replace the custom definitions.
    ///
    /// Synchronizers whose definition is unchanged keep their buffers;
    /// disabled definitions get no synchronizer.
    pub fn set_definitions(
        &mut self,
        definitions: Vec<ProtocolDefinition>,
    ) -> Result<(), ProtocolError> {
        validate_definitions(&definitions)?;

        let mut previous = std::mem::take(&mut self.custom);
        self.custom = definitions
            .iter()
            .filter(|def| def.enabled)
            .map(|def| {
                match previous.iter().position(|sync| sync.definition() == def) {
                    Some(index) => previous.swap_remove(index),
                    None => FrameSynchronizer::new(def.clone()),
                }
            })
            .collect();
        self.definitions = definitions;

        tracing::debug!(
            "protocol registry: {} custom protocol(s) enabled, built-in {}",
            self.custom.len(),
            if self.default_suppressed() { "suppressed" } else { "active" }
        );
        Ok(())
    }

    /// All configured custom definitions, enabled or not
    pub fn definitions(&self) -> &[ProtocolDefinition] {
        &self.definitions
    }

    /// Names of the synchronizers currently fed, built-in first
    pub fn active_protocols(&self) -> Vec<&str> {
        let mut names = Vec::with_capacity(self.custom.len() + 1);
        if !self.default_suppressed() {
            names.push(self.builtin.name());
        }
        names.extend(self.custom.iter().map(|sync| sync.name()));
        names
    }

    /// Whether an enabled custom protocol shares the built-in header
    pub fn default_suppressed(&self) -> bool {
        self.custom
            .iter()
            .any(|sync| sync.definition().shares_default_header())
    }

    /// Dispatch a chunk, stamping frames with the current time
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.feed_at(chunk, Local::now())
    }

    /// Dispatch a chunk, stamping frames with `timestamp`
    pub fn feed_at(&mut self, chunk: &[u8], timestamp: DateTime<Local>) -> Vec<Frame> {
        let mut frames = Vec::new();

        if !self.default_suppressed() {
            frames.extend(self.builtin.feed_at(chunk, timestamp));
        }

        for sync in &mut self.custom {
            for frame in sync.feed_at(chunk, timestamp) {
                tracing::debug!("[{}] rx: {}", frame.protocol(), frame.to_hex());
                frames.push(frame);
            }
        }

        frames
    }

    /// Statistics of a synchronizer by protocol name
    pub fn stats(&self, name: &str) -> Option<SyncStats> {
        std::iter::once(&self.builtin)
            .chain(self.custom.iter())
            .find(|sync| sync.name() == name)
            .map(|sync| sync.stats())
    }

    /// Discard the buffered bytes of every synchronizer
    pub fn reset(&mut self) {
        self.builtin.reset();
        for sync in &mut self.custom {
            sync.reset();
        }
    }
}

pub(crate) fn validate_definitions(definitions: &[ProtocolDefinition]) -> Result<(), ProtocolError> {
    let mut seen = HashSet::new();
    for def in definitions {
        def.validate()?;
        if !seen.insert(def.name.as_str()) {
            return Err(ProtocolError::DuplicateName(def.name.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumKind;
    use crate::protocol::DEFAULT_HEADER;

    fn default_frame() -> Vec<u8> {
        let mut frame = vec![0u8; 38];
        frame[..2].copy_from_slice(&DEFAULT_HEADER);
        frame[36] = 0xAA;
        frame[37] = 0xAA;
        frame
    }

    fn sensor() -> ProtocolDefinition {
        ProtocolDefinition::new("sensor", vec![0x7E], vec![], 4, ChecksumKind::Xor8).unwrap()
    }

    #[test]
    fn test_builtin_only() {
        let mut registry = ProtocolRegistry::default();
        let frames = registry.feed(&default_frame());
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_default());
        assert_eq!(registry.active_protocols(), vec!["default"]);
    }

    #[test]
    fn test_parallel_protocols() {
        let mut registry = ProtocolRegistry::new(vec![sensor()]).unwrap();
        let mut stream = default_frame();
        let mut custom = vec![0x7E, 0x01, 0x02];
        ChecksumKind::Xor8.append(&mut custom);
        stream.extend_from_slice(&custom);

        let frames = registry.feed(&stream);
        let names: Vec<&str> = frames.iter().map(|f| f.protocol()).collect();
        assert_eq!(names, vec!["default", "sensor"]);
    }

    #[test]
    fn test_shared_header_suppresses_builtin() {
        let clone = ProtocolDefinition::new(
            "clone",
            DEFAULT_HEADER.to_vec(),
            vec![0xAA, 0xAA],
            38,
            ChecksumKind::None,
        )
        .unwrap();
        let mut registry = ProtocolRegistry::new(vec![clone]).unwrap();
        assert!(registry.default_suppressed());

        let frames = registry.feed(&default_frame());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].protocol(), "clone");
    }

    #[test]
    fn test_disabled_shared_header_does_not_suppress() {
        let mut clone =
            ProtocolDefinition::new("clone", DEFAULT_HEADER.to_vec(), vec![], 38, ChecksumKind::None)
                .unwrap();
        clone.enabled = false;
        let mut registry = ProtocolRegistry::new(vec![clone]).unwrap();
        assert!(!registry.default_suppressed());
        assert_eq!(registry.feed(&default_frame()).len(), 1);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = ProtocolRegistry::new(vec![sensor(), sensor()]).unwrap_err();
        assert_eq!(err, ProtocolError::DuplicateName("sensor".into()));
    }

    #[test]
    fn test_unchanged_definition_keeps_buffer() {
        let mut registry = ProtocolRegistry::new(vec![sensor()]).unwrap();
        registry.feed(&[0x7E, 0x01]);

        let other = ProtocolDefinition::new("other", vec![0x5A], vec![], 3, ChecksumKind::Sum8).unwrap();
        registry.set_definitions(vec![sensor(), other]).unwrap();

        // 0x7E ^ 0x01 ^ 0x02 = 0x7D
        let frames = registry.feed(&[0x02, 0x7D]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].bytes(), &[0x7E, 0x01, 0x02, 0x7D]);
        assert_eq!(registry.stats("sensor").map(|s| s.frames), Some(1));
    }
}
