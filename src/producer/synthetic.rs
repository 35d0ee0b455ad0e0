//! Synthetic producer for demos and soak runs.
//!
//! Each (entity, variable) trajectory is a mean-reverting random walk in
//! `[0, 1]`, which gives a red-noise spectrum with a clearly negative slope.

use rand::prelude::*;
use rand_distr::StandardNormal;
use std::time::Duration;

use super::{Capture, FeatureProducer, ProducerError};
use crate::config::defaults::LIVE_ID_PREFIX;
use crate::config::SyntheticSettings;
use crate::types::{DataPacket, EntityId, Frame, VariableName};

/// Step noise of the random walk.
const WALK_SIGMA: f64 = 0.05;
/// Pull towards the centre per step.
const MEAN_REVERSION: f64 = 0.05;
const FRAME_WIDTH: u32 = 32;
const FRAME_HEIGHT: u32 = 24;

pub struct SyntheticProducer {
    rng: StdRng,
    entities: Vec<EntityId>,
    variables: Vec<VariableName>,
    /// Current value per entity, per variable (same order as the vectors above)
    state: Vec<Vec<f64>>,
    interval: Duration,
    remaining: Option<usize>,
    frames: bool,
    tick: u64,
}

impl SyntheticProducer {
    pub fn new(settings: &SyntheticSettings, variables: Vec<VariableName>) -> Self {
        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let entities: Vec<EntityId> = (1..=settings.entities)
            .map(|i| format!("{LIVE_ID_PREFIX}{i}"))
            .collect();
        let state = entities
            .iter()
            .map(|_| variables.iter().map(|_| rng.gen_range(0.2..0.8)).collect())
            .collect();

        Self {
            rng,
            entities,
            variables,
            state,
            interval: Duration::from_millis(settings.interval_ms),
            remaining: settings.packets,
            frames: settings.frames,
            tick: 0,
        }
    }

    fn timestamp(&self) -> f64 {
        if self.interval.is_zero() {
            self.tick as f64
        } else {
            self.tick as f64 * self.interval.as_secs_f64()
        }
    }

    fn step(&mut self) -> DataPacket {
        let mut packet = DataPacket::new(self.timestamp());
        for (e, entity) in self.entities.iter().enumerate() {
            for (v, variable) in self.variables.iter().enumerate() {
                let noise: f64 = self.rng.sample(StandardNormal);
                let x = self.state[e][v];
                let next = (x + MEAN_REVERSION * (0.5 - x) + WALK_SIGMA * noise).clamp(0.0, 1.0);
                self.state[e][v] = next;
                packet.insert(entity, variable, next);
            }
        }
        packet
    }

    fn frame(&self, timestamp: f64) -> Frame {
        let shade = (self.tick % 256) as u8;
        Frame {
            timestamp,
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            data: vec![shade; (FRAME_WIDTH * FRAME_HEIGHT) as usize],
        }
    }
}

impl FeatureProducer for SyntheticProducer {
    fn name(&self) -> &str {
        "Synthetic"
    }

    fn next_capture(&mut self) -> Result<Option<Capture>, ProducerError> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Ok(None);
            }
            *remaining -= 1;
        }
        if !self.interval.is_zero() && self.tick > 0 {
            std::thread::sleep(self.interval);
        }

        let packet = self.step();
        let mut capture = Capture::packet(packet);
        if self.frames {
            capture = capture.with_frame(self.frame(self.timestamp()));
        }
        self.tick += 1;
        Ok(Some(capture))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::SpectralFeatureEngine;

    fn settings(packets: usize) -> SyntheticSettings {
        SyntheticSettings {
            entities: 2,
            interval_ms: 0,
            packets: Some(packets),
            seed: Some(7),
            frames: true,
        }
    }

    #[test]
    fn test_emits_requested_packets_then_exhausts() {
        let mut producer = SyntheticProducer::new(&settings(5), vec!["happy".into(), "yaw".into()]);
        let mut timestamps = Vec::new();
        while let Some(capture) = producer.next_capture().expect("capture") {
            let packet = capture.packet.expect("packet");
            assert_eq!(packet.entities.len(), 2);
            assert!(packet.entities.contains_key("ID_1"));
            assert!(capture.frame.is_some());
            timestamps.push(packet.timestamp);
        }
        assert_eq!(timestamps, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let vars = vec!["happy".to_string()];
        let mut a = SyntheticProducer::new(&settings(3), vars.clone());
        let mut b = SyntheticProducer::new(&settings(3), vars);
        for _ in 0..3 {
            assert_eq!(
                a.next_capture().expect("a").map(|c| c.packet),
                b.next_capture().expect("b").map(|c| c.packet)
            );
        }
    }

    #[test]
    fn test_random_walk_has_negative_slope() {
        let mut producer = SyntheticProducer::new(&settings(256), vec!["happy".into()]);
        let mut series = Vec::new();
        while let Some(capture) = producer.next_capture().expect("capture") {
            if let Some(v) = capture.packet.and_then(|p| p.value("ID_1", "happy")) {
                series.push(v);
            }
        }
        let slope = SpectralFeatureEngine::new().analyze(&series).slope();
        assert!(slope < 0.0, "red noise should have a negative slope, got {slope}");
    }
}
