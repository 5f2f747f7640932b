// Hardware settings of the plate that are not tied to a well.
use serde::{Deserialize, Serialize};

/// Fan driven by PWM on pin 11. Full speed (255) and off (0) need no extra code on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hardware {
    #[serde(default = "Hardware::default_fan_speed")]
    pub fan_speed: u8,
}

impl Default for Hardware {
    fn default() -> Self {
        Self {
            fan_speed: Self::default_fan_speed(),
        }
    }
}

impl Hardware {
    fn default_fan_speed() -> u8 {
        255
    }

    pub fn fan_status(&self) -> String {
        format!("Fan speed: {}", self.fan_speed)
    }

    /// Whether the fan speed needs PWM, i.e. is neither off nor full speed.
    pub fn fan_modulated(&self) -> bool {
        !matches!(self.fan_speed, 0 | 255)
    }
}

#[cfg(test)]
mod test {
    use crate::hardware::*;

    #[test]
    fn defaults_to_full_speed() {
        let hw: Hardware = serde_json::from_str("{}").unwrap();
        assert_eq!(hw.fan_speed, 255);
        assert!(!hw.fan_modulated());
        assert!(Hardware { fan_speed: 128 }.fan_modulated());
        assert_eq!(Hardware { fan_speed: 0 }.fan_status(), "Fan speed: 0");
    }
}
