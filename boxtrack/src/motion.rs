//! Constant-velocity motion model for a single bounding box

use crate::bbox::Bbox;
use crate::kalman::{KalmanFilter, KalmanModel};
use anyhow::Result;
use nalgebra::{DMatrix, DVector};

/// Noise diagonals of the box motion model
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionNoise {
    /// Uncertainties of (x, y, s, r) measurements
    pub measurement: [f32; 4],
    /// Uncertainties of (x, y, s, r, dx, dy, ds) during transition
    pub process: [f32; 7],
}

impl Default for MotionNoise {
    fn default() -> Self {
        Self {
            measurement: [1.0, 1.0, 10.0, 10.0],
            process: [1.0, 1.0, 1.0, 1.0, 0.01, 0.01, 0.0001],
        }
    }
}

impl MotionNoise {
    /// Trusts the motion model more, so predictions change slowly
    pub fn smooth() -> Self {
        Self {
            measurement: [4.0, 4.0, 40.0, 40.0],
            process: [0.5, 0.5, 0.5, 0.5, 0.005, 0.005, 0.00005],
        }
    }

    /// Trusts measurements more, so predictions follow observations closely
    pub fn responsive() -> Self {
        Self {
            measurement: [0.5, 0.5, 5.0, 5.0],
            process: [2.0, 2.0, 2.0, 2.0, 0.02, 0.02, 0.0002],
        }
    }
}

/// Predicts where a box moves next from its past positions.
///
/// State: [center_x, center_y, area, aspect_ratio, vel_x, vel_y, vel_area]
#[derive(Debug, Clone)]
pub struct BoxPredictor {
    kf: KalmanFilter,
    /// number of predict() calls
    pub age: u32,
    /// number of corrections received
    pub hits: u32,
    /// predictions since the last correction
    pub steps_since_correction: u32,
}

impl BoxPredictor {
    pub fn new(bbox: &Bbox, noise: MotionNoise) -> Result<Self> {
        let z = bbox.to_z();

        #[rustfmt::skip]
        let transition = DMatrix::from_row_slice(7, 7, &[
            1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0,
            0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0,
        ]);

        let mut observation = DMatrix::zeros(4, 7);
        for i in 0..4 {
            observation[(i, i)] = 1.0;
        }

        let model = KalmanModel {
            x: DVector::from_vec(vec![z[0], z[1], z[2], z[3], 0.0, 0.0, 0.0]),
            p: DMatrix::from_diagonal(&DVector::from_vec(vec![
                10.0, 10.0, 10.0, 10.0, 10000.0, 10000.0, 10000.0,
            ])),
            f: transition,
            h: observation,
            r: DMatrix::from_diagonal(&DVector::from_vec(noise.measurement.to_vec())),
            q: DMatrix::from_diagonal(&DVector::from_vec(noise.process.to_vec())),
        };

        Ok(Self {
            kf: KalmanFilter::new(model)?,
            age: 0,
            hits: 0,
            steps_since_correction: 0,
        })
    }

    /// Advance one frame. Returns None once the predicted box degenerates.
    pub fn predict(&mut self) -> Option<Bbox> {
        // Keep the area from being driven negative by its own velocity
        let state = self.kf.state_mut();
        if state[6] + state[2] <= 0.0 {
            state[6] = 0.0;
        }

        self.kf.predict();
        self.age += 1;
        self.steps_since_correction += 1;

        let bbox = self.bbox();
        if bbox.is_finite() && bbox.width() > 0.0 && bbox.height() > 0.0 {
            Some(bbox)
        } else {
            None
        }
    }

    /// Fold an observed box into the motion estimate
    pub fn correct(&mut self, bbox: &Bbox) -> Result<()> {
        let z = bbox.to_z();
        self.kf.update(&DVector::from_vec(z.to_vec()))?;
        self.hits += 1;
        self.steps_since_correction = 0;
        Ok(())
    }

    /// Current box from the filter state
    pub fn bbox(&self) -> Bbox {
        let state = self.kf.state();
        Bbox::from_z(&[state[0], state[1], state[2], state[3]])
    }

    /// Estimated per-frame displacement of the box center
    pub fn velocity(&self) -> (f32, f32) {
        let state = self.kf.state();
        (state[4], state[5])
    }
}
