//! Configuration du store de timeline.

use serde::{Deserialize, Serialize};

use crate::TimelineError;

/// Paramètres du store, sérialisables dans la configuration de l'hôte.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    /// Durée de la fenêtre d'un segment, en secondes. La capacité d'un
    /// buffer brut est fixée à l'allocation et ne change jamais.
    pub segment_seconds: u32,
    /// Frames par bucket du rendu de waveform (pics min/max).
    pub waveform_bucket_frames: u32,
    /// Préfixe des clés du blob store.
    pub key_prefix: String,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            segment_seconds: 30,
            waveform_bucket_frames: 512,
            key_prefix: "pmoedit".to_string(),
        }
    }
}

impl TimelineConfig {
    pub fn validate(&self) -> Result<(), TimelineError> {
        if self.segment_seconds == 0 {
            return Err(TimelineError::Config(
                "segment window must be at least one second".into(),
            ));
        }
        if self.waveform_bucket_frames == 0 {
            return Err(TimelineError::Config(
                "waveform bucket must hold at least one frame".into(),
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(TimelineError::Config("key prefix must not be empty".into()));
        }
        Ok(())
    }

    /// Capacité d'un segment en frames pour un taux d'échantillonnage donné.
    pub fn window_frames(&self, sample_rate: u32) -> u64 {
        self.segment_seconds as u64 * sample_rate as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TimelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window_frames(48_000), 30 * 48_000);
    }

    #[test]
    fn test_zero_window_rejected() {
        let config = TimelineConfig {
            segment_seconds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = TimelineConfig {
            segment_seconds: 5,
            waveform_bucket_frames: 256,
            key_prefix: "proj42".into(),
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: TimelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.segment_seconds, 5);
        assert_eq!(back.key_prefix, "proj42");
    }
}
