//! Probe files
//!
//! A probe file assigns electrode groups and spatial locations to recording
//! channels. Format (TOML):
//!
//! ```toml
//! [[channels]]
//! id = 0
//! group = 0
//! location = [0.0, 0.0]
//!
//! [[channels]]
//! id = 1
//! group = 0
//! location = [0.0, 25.0]
//! ```

use crate::property::{PropertyValue, GROUP_PROPERTY, LOCATION_PROPERTY};
use crate::recording::InMemoryRecording;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One probe channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeChannel {
    pub id: u32,
    #[serde(default)]
    pub group: Option<i64>,
    #[serde(default)]
    pub location: Option<Vec<f64>>,
}

/// Probe geometry and grouping
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Probe {
    #[serde(default)]
    pub channels: Vec<ProbeChannel>,
}

impl Probe {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let probe: Probe = toml::from_str(content)
            .map_err(|e| Error::Format(format!("Parse probe file failed: {}", e)))?;
        probe.validate()?;
        Ok(probe)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::NotFound(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        let mut ids: Vec<u32> = self.channels.iter().map(|c| c.id).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(Error::Format("probe channel ids must be unique".to_string()));
        }
        let dims: Vec<usize> = self
            .channels
            .iter()
            .filter_map(|c| c.location.as_ref().map(|l| l.len()))
            .collect();
        if dims.windows(2).any(|w| w[0] != w[1]) {
            return Err(Error::Format(
                "probe locations must all have the same dimension".to_string(),
            ));
        }
        Ok(())
    }

    /// Attach `group` and `location` properties to the recording's channels
    ///
    /// Every probe channel must exist in the recording.
    pub fn apply(&self, recording: &mut InMemoryRecording) -> Result<()> {
        for channel in &self.channels {
            if let Some(group) = channel.group {
                recording.set_channel_property(channel.id, GROUP_PROPERTY, PropertyValue::Int(group))?;
            }
            if let Some(location) = &channel.location {
                recording.set_channel_property(
                    channel.id,
                    LOCATION_PROPERTY,
                    PropertyValue::Vector(location.clone()),
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Recording;

    const TETRODE_PAIR: &str = r#"
[[channels]]
id = 0
group = 0
location = [0.0, 0.0]

[[channels]]
id = 1
group = 0
location = [0.0, 25.0]

[[channels]]
id = 2
group = 1
location = [200.0, 0.0]
"#;

    #[test]
    fn test_parse_and_apply() {
        let probe = Probe::from_toml_str(TETRODE_PAIR).unwrap();
        assert_eq!(probe.channels.len(), 3);

        let mut rec = InMemoryRecording::new(vec![vec![0.0; 4]; 3], 30000.0).unwrap();
        probe.apply(&mut rec).unwrap();

        assert_eq!(rec.channel_groups(), Some(vec![0, 0, 1]));
        assert_eq!(rec.channel_locations().unwrap()[2], vec![200.0, 0.0]);
    }

    #[test]
    fn test_unknown_channel_fails() {
        let probe = Probe::from_toml_str(TETRODE_PAIR).unwrap();
        let mut rec = InMemoryRecording::new(vec![vec![0.0; 4]; 2], 30000.0).unwrap();
        assert!(probe.apply(&mut rec).is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let content = "[[channels]]\nid = 0\n[[channels]]\nid = 0\n";
        assert!(matches!(Probe::from_toml_str(content), Err(Error::Format(_))));
    }

    #[test]
    fn test_mixed_dimensions_rejected() {
        let content = "[[channels]]\nid = 0\nlocation = [0.0]\n[[channels]]\nid = 1\nlocation = [0.0, 1.0]\n";
        assert!(Probe::from_toml_str(content).is_err());
    }
}
