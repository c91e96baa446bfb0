//! Per-frame snapshot handed to whatever draws the ring.
//!
//! The simulation never draws anything itself; a [`FrameSink`] receives a
//! [`RenderFrame`] after each tick and decides what to do with it.

use serde::Serialize;
use std::io::Write;
use tracing::info;

use crate::sim::constants::{effect, render};
use crate::sim::effect::RingShape;
use crate::sim::node::Identity;
use crate::sim::simulation::ReactionSimulation;
use crate::util::vec2::Vec2;

/// One node as drawn on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NodeSprite {
    pub identity: Identity,
    pub angle: f64,
    pub position: Vec2,
    pub radius: f64,
}

/// Static ring decoration: the orbit is drawn as two concentric circles
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RingGeometry {
    pub center: Vec2,
    pub outer_radius: f64,
    pub inner_radius: f64,
    pub outer_line_width: f64,
    pub inner_line_width: f64,
    pub color: [u8; 3],
    pub effect_color: [u8; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderFrame {
    pub tick: u64,
    pub width: f64,
    pub height: f64,
    pub ring: RingGeometry,
    pub nodes: Vec<NodeSprite>,
    pub effects: Vec<RingShape>,
}

impl RenderFrame {
    pub fn capture(sim: &ReactionSimulation) -> Self {
        let config = sim.config();
        let center = sim.center();

        let mut nodes: Vec<NodeSprite> = sim
            .nodes()
            .map(|node| NodeSprite {
                identity: node.identity,
                angle: node.angle(),
                position: node.position(),
                radius: config.node_radius,
            })
            .collect();
        nodes.sort_by_key(|sprite| sprite.identity);

        let effects = sim
            .effects()
            .iter()
            .filter_map(|(_, fx)| {
                // Ambient effects have no anchor and draw nothing here
                let owner = fx.owner()?;
                let node = sim.node(owner)?;
                Some(fx.ring(node.position(), config.node_radius, config.effect_radius))
            })
            .collect();

        Self {
            tick: sim.tick_count(),
            width: config.width,
            height: config.height,
            ring: RingGeometry {
                center,
                outer_radius: render::OUTER_CIRCLE_RADIUS,
                inner_radius: render::INNER_CIRCLE_RADIUS,
                outer_line_width: render::OUTER_CIRCLE_LINE_WIDTH,
                inner_line_width: render::INNER_CIRCLE_LINE_WIDTH,
                color: render::COLOR_RGB,
                effect_color: effect::REACTION_RGB,
            },
            nodes,
            effects,
        }
    }
}

/// Receiver of rendered frames
pub trait FrameSink: Send {
    fn present(&mut self, frame: &RenderFrame);
}

/// Logs a one-line summary every `every` frames
pub struct LogSink {
    every: u64,
}

impl LogSink {
    pub fn new(every: u64) -> Self {
        Self { every: every.max(1) }
    }
}

impl FrameSink for LogSink {
    fn present(&mut self, frame: &RenderFrame) {
        if frame.tick % self.every == 0 {
            info!(
                "Frame {}: {} nodes, {} active rings",
                frame.tick,
                frame.nodes.len(),
                frame.effects.len()
            );
        }
    }
}

/// Writes every frame as one JSON line
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> FrameSink for JsonLinesSink<W> {
    fn present(&mut self, frame: &RenderFrame) {
        let result = serde_json::to_writer(&mut self.writer, frame)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"));
        if let Err(e) = result {
            tracing::warn!("Failed to write frame {}: {}", frame.tick, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::effect::{Effect, EffectKind};

    #[test]
    fn test_frame_contains_nodes_and_rings() {
        let mut sim = ReactionSimulation::default();
        sim.add_identity(Identity(1)).unwrap();
        sim.add_identity(Identity(0)).unwrap();
        sim.trigger_reaction(Identity(1)).unwrap();
        sim.add_ambient_effect(Effect::new(EffectKind::Ambient, 5));
        sim.tick();

        let frame = sim.render_frame();
        assert_eq!(frame.tick, 1);
        assert_eq!(frame.nodes.len(), 2);
        assert_eq!(frame.nodes[0].identity, Identity(0));
        assert_eq!(frame.effects.len(), 1);

        let anchor = sim.node(Identity(1)).unwrap().position();
        assert_eq!(frame.effects[0].center, anchor);
        assert_eq!(frame.ring.center, Vec2::new(400.0, 300.0));
    }

    #[test]
    fn test_json_lines_sink() {
        let mut sim = ReactionSimulation::default();
        sim.add_identity(Identity(3)).unwrap();
        sim.tick();

        let mut sink = JsonLinesSink::new(Vec::new());
        sink.present(&sim.render_frame());
        sink.present(&sim.render_frame());

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);

        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["tick"], 1);
        assert_eq!(value["nodes"][0]["identity"], 3);
    }
}
