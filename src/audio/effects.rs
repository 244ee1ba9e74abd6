use serde::Serialize;
use serde_json::{json, Value};

/// Bandas del ecualizador del nodo (25 Hz .. 16 kHz)
pub const EQ_BANDS: usize = 15;

/// Presets de ecualizador disponibles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EqualizerPreset {
    #[default]
    Flat,
    Bass,
    Pop,
    Rock,
    Jazz,
    Classical,
    Electronic,
    Vocal,
}

impl EqualizerPreset {
    /// Ganancias por banda en el rango del nodo (-0.25 a 1.0)
    pub fn gains(&self) -> [f32; EQ_BANDS] {
        match self {
            EqualizerPreset::Flat => [0.0; EQ_BANDS],
            EqualizerPreset::Bass => [
                0.25, 0.2, 0.15, 0.1, 0.05, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
            ],
            EqualizerPreset::Pop => [
                -0.02, 0.04, 0.08, 0.1, 0.12, 0.1, 0.06, 0.0, -0.02, -0.02, 0.0, 0.0, 0.02, 0.02, 0.0,
            ],
            EqualizerPreset::Rock => [
                0.12, 0.1, 0.08, 0.04, 0.0, -0.04, -0.04, 0.0, 0.04, 0.06, 0.08, 0.1, 0.1, 0.08, 0.08,
            ],
            EqualizerPreset::Jazz => [
                0.0, 0.02, 0.04, 0.06, 0.06, 0.04, 0.02, 0.0, 0.02, 0.04, 0.06, 0.06, 0.06, 0.04, 0.02,
            ],
            EqualizerPreset::Classical => [
                0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -0.04, -0.04, -0.04, -0.06, -0.06, -0.06, -0.08, -0.08,
            ],
            EqualizerPreset::Electronic => [
                0.1, 0.08, 0.04, 0.0, -0.02, 0.02, 0.0, -0.02, 0.0, 0.04, 0.08, 0.1, 0.1, 0.08, 0.06,
            ],
            EqualizerPreset::Vocal => [
                -0.04, -0.04, -0.02, 0.0, 0.04, 0.08, 0.1, 0.08, 0.06, 0.04, 0.02, 0.0, -0.02, -0.02, -0.02,
            ],
        }
    }

    /// Obtiene un preset por nombre
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "flat" | "normal" => Some(EqualizerPreset::Flat),
            "bass" | "bassboost" => Some(EqualizerPreset::Bass),
            "pop" => Some(EqualizerPreset::Pop),
            "rock" => Some(EqualizerPreset::Rock),
            "jazz" => Some(EqualizerPreset::Jazz),
            "classical" => Some(EqualizerPreset::Classical),
            "electronic" => Some(EqualizerPreset::Electronic),
            "vocal" => Some(EqualizerPreset::Vocal),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EqualizerPreset::Flat => "flat",
            EqualizerPreset::Bass => "bass",
            EqualizerPreset::Pop => "pop",
            EqualizerPreset::Rock => "rock",
            EqualizerPreset::Jazz => "jazz",
            EqualizerPreset::Classical => "classical",
            EqualizerPreset::Electronic => "electronic",
            EqualizerPreset::Vocal => "vocal",
        }
    }
}

/// Velocidad, tono y tasa (1.0 = sin cambio)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Timescale {
    pub speed: f32,
    pub pitch: f32,
    pub rate: f32,
}

impl Timescale {
    pub fn nightcore() -> Self {
        Self {
            speed: 1.2,
            pitch: 1.2,
            rate: 1.0,
        }
    }

    pub fn vaporwave() -> Self {
        Self {
            speed: 0.85,
            pitch: 0.8,
            rate: 1.0,
        }
    }
}

/// Estado de filtros de una sesión
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterState {
    pub equalizer: EqualizerPreset,
    pub timescale: Option<Timescale>,
}

impl FilterState {
    pub fn with_equalizer(preset: EqualizerPreset) -> Self {
        Self {
            equalizer: preset,
            timescale: None,
        }
    }

    /// Acepta nombres de ecualizador y los efectos `nightcore` / `vaporwave`
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "nightcore" => Some(Self {
                equalizer: EqualizerPreset::Flat,
                timescale: Some(Timescale::nightcore()),
            }),
            "vaporwave" => Some(Self {
                equalizer: EqualizerPreset::Bass,
                timescale: Some(Timescale::vaporwave()),
            }),
            "reset" | "off" => Some(Self::default()),
            other => EqualizerPreset::from_name(other).map(Self::with_equalizer),
        }
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Cuerpo `filters` para el nodo. Los campos vacíos limpian el filtro.
    pub fn to_payload(&self) -> Value {
        let bands: Vec<Value> = self
            .equalizer
            .gains()
            .iter()
            .enumerate()
            .map(|(band, gain)| json!({ "band": band, "gain": gain }))
            .collect();

        let mut payload = json!({ "equalizer": bands });
        if let Some(timescale) = self.timescale {
            payload["timescale"] = json!(timescale);
        }
        payload
    }

    pub fn describe(&self) -> String {
        match self.timescale {
            Some(ts) if ts == Timescale::nightcore() => "nightcore".to_string(),
            Some(ts) if ts == Timescale::vaporwave() => "vaporwave".to_string(),
            Some(_) => format!("{} + timescale", self.equalizer.name()),
            None => self.equalizer.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_preset_lookup() {
        assert_eq!(EqualizerPreset::from_name("Rock"), Some(EqualizerPreset::Rock));
        assert_eq!(EqualizerPreset::from_name("normal"), Some(EqualizerPreset::Flat));
        assert_eq!(EqualizerPreset::from_name("metal"), None);
    }

    #[test]
    fn test_payload_has_every_band() {
        let payload = FilterState::with_equalizer(EqualizerPreset::Bass).to_payload();
        let bands = payload["equalizer"].as_array().unwrap();

        assert_eq!(bands.len(), EQ_BANDS);
        assert!(payload.get("timescale").is_none());
    }

    #[test]
    fn test_nightcore_and_reset() {
        let mut filters = FilterState::from_name("nightcore").unwrap();
        assert_eq!(filters.describe(), "nightcore");
        assert!(filters.to_payload()["timescale"]["speed"].as_f64().unwrap() > 1.0);

        filters.reset();
        assert!(filters.is_default());
    }
}
