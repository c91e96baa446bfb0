/// Orbital dynamics constants. Angles and rates are in turns per tick.
pub mod physics {
    /// Velocity-proportional damping applied as torque: `-FRICTION * angle_rate`
    pub const FRICTION: f64 = 0.2;
    /// Pairwise repulsion numerator, divided by the (linear) angular distance
    pub const REPULSION: f64 = 0.00005;
    /// Constant clockwise drift added to every node each tick
    pub const CLOCKWISE_WIND: f64 = 0.0003;
    /// Maximum |angle_rate|
    pub const MAX_ANGLE_RATE: f64 = 0.25;
    /// Tick period in milliseconds (~30 Hz)
    pub const TICK_DURATION_MS: u64 = 33;
    /// Nominal tick rate in Hz, used for budget accounting
    pub const TICK_RATE: u32 = 30;
}

/// Membership limits
pub mod membership {
    /// Maximum number of nodes tracked by one simulation
    pub const MAX_NODES: usize = 100;
}

/// Reaction effect constants
pub mod effect {
    /// Lifetime of a reaction ring in ticks
    pub const REACTION_LIFETIME: u32 = 10;
    /// Radius the reaction ring expands to, in pixels
    pub const REACTION_RADIUS: f64 = 200.0;
    /// Fill color of the reaction ring
    pub const REACTION_RGB: [u8; 3] = [209, 173, 89];
}

/// Canvas geometry for the ring renderer
pub mod render {
    pub const WIDTH: f64 = 800.0;
    pub const HEIGHT: f64 = 600.0;
    /// Radius of the orbit the nodes travel on
    pub const ORBITAL_RADIUS: f64 = 250.0;
    pub const NODE_RADIUS: f64 = 6.0;
    pub const OUTER_CIRCLE_RADIUS: f64 = 250.0;
    pub const INNER_CIRCLE_RADIUS: f64 = 230.0;
    pub const OUTER_CIRCLE_LINE_WIDTH: f64 = 4.0;
    pub const INNER_CIRCLE_LINE_WIDTH: f64 = 1.0;
    pub const COLOR_RGB: [u8; 3] = [209, 173, 89];
}
