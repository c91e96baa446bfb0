use crate::sim::constants::{effect, membership, physics, render};

/// Tunables for one [`ReactionSimulation`](crate::sim::simulation::ReactionSimulation).
///
/// `Copy`: each simulation owns its own values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationConfig {
    pub friction: f64,
    pub repulsion: f64,
    pub clockwise_wind: f64,
    /// `None` disables the rate clamp
    pub max_angle_rate: Option<f64>,
    pub max_nodes: usize,
    pub effect_lifetime: u32,
    pub effect_radius: f64,
    pub orbital_radius: f64,
    pub node_radius: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            friction: physics::FRICTION,
            repulsion: physics::REPULSION,
            clockwise_wind: physics::CLOCKWISE_WIND,
            max_angle_rate: Some(physics::MAX_ANGLE_RATE),
            max_nodes: membership::MAX_NODES,
            effect_lifetime: effect::REACTION_LIFETIME,
            effect_radius: effect::REACTION_RADIUS,
            orbital_radius: render::ORBITAL_RADIUS,
            node_radius: render::NODE_RADIUS,
            width: render::WIDTH,
            height: render::HEIGHT,
        }
    }
}

impl SimulationConfig {
    /// Load overrides from `SIM_*` environment variables, falling back to defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_f64("SIM_FRICTION") {
            config.friction = v;
        }
        if let Some(v) = env_f64("SIM_REPULSION") {
            config.repulsion = v;
        }
        if let Some(v) = env_f64("SIM_CLOCKWISE_WIND") {
            config.clockwise_wind = v;
        }

        if let Ok(raw) = std::env::var("SIM_MAX_ANGLE_RATE") {
            if raw.eq_ignore_ascii_case("none") || raw.eq_ignore_ascii_case("off") {
                config.max_angle_rate = None;
            } else if let Ok(parsed) = raw.parse::<f64>() {
                if parsed.is_finite() && parsed > 0.0 {
                    config.max_angle_rate = Some(parsed);
                } else {
                    tracing::warn!("SIM_MAX_ANGLE_RATE must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid SIM_MAX_ANGLE_RATE '{}', using default", raw);
            }
        }

        if let Ok(raw) = std::env::var("SIM_MAX_NODES") {
            match raw.parse::<usize>() {
                Ok(parsed) if parsed > 0 && parsed <= 10_000 => config.max_nodes = parsed,
                Ok(_) => tracing::warn!("SIM_MAX_NODES must be 1-10000, using default"),
                Err(_) => tracing::warn!("Invalid SIM_MAX_NODES '{}', using default", raw),
            }
        }

        if let Ok(raw) = std::env::var("SIM_EFFECT_LIFETIME") {
            match raw.parse::<u32>() {
                Ok(parsed) if parsed >= 1 => config.effect_lifetime = parsed,
                _ => tracing::warn!("Invalid SIM_EFFECT_LIFETIME '{}', using default", raw),
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if !self.friction.is_finite() || self.friction < 0.0 {
            return Err("friction must be a non-negative number".to_string());
        }
        if !self.repulsion.is_finite() {
            return Err("repulsion must be finite".to_string());
        }
        if !self.clockwise_wind.is_finite() {
            return Err("clockwise_wind must be finite".to_string());
        }
        if let Some(rate) = self.max_angle_rate {
            if !rate.is_finite() || rate <= 0.0 {
                return Err("max_angle_rate must be > 0".to_string());
            }
        }
        if self.max_nodes == 0 {
            return Err("max_nodes must be at least 1".to_string());
        }
        if self.effect_lifetime == 0 {
            return Err("effect_lifetime must be at least 1".to_string());
        }
        if self.effect_radius <= self.node_radius {
            return Err("effect_radius must exceed node_radius".to_string());
        }
        Ok(())
    }
}

fn env_f64(key: &str) -> Option<f64> {
    let raw = std::env::var(key).ok()?;
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SimulationConfig::default();
        assert_eq!(config.max_nodes, 100);
        assert_eq!(config.effect_lifetime, 10);
        assert_eq!(config.max_angle_rate, Some(0.25));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default_is_valid() {
        let config = SimulationConfig::load_or_default();
        assert!(config.max_nodes > 0);
    }

    #[test]
    fn test_validate_rejects_zero_lifetime() {
        let config = SimulationConfig {
            effect_lifetime: 0,
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_rate() {
        let config = SimulationConfig {
            max_angle_rate: Some(0.0),
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());

        let unclamped = SimulationConfig {
            max_angle_rate: None,
            ..SimulationConfig::default()
        };
        assert!(unclamped.validate().is_ok());
    }

    #[test]
    fn test_configs_are_independent() {
        let a = SimulationConfig::default();
        let mut b = a;
        b.friction = 0.9;
        assert_eq!(a.friction, 0.2);
    }
}
