//! Linear Kalman filter used by the box motion model

use anyhow::{anyhow, Result};
use nalgebra::{DMatrix, DVector};

/// Model matrices and initial belief for a [`KalmanFilter`]
#[derive(Debug, Clone)]
pub struct KalmanModel {
    /// Initial state
    pub x: DVector<f32>,
    /// Initial state covariance
    pub p: DMatrix<f32>,
    /// State transition
    pub f: DMatrix<f32>,
    /// Observation
    pub h: DMatrix<f32>,
    /// Observation noise covariance
    pub r: DMatrix<f32>,
    /// Process noise covariance
    pub q: DMatrix<f32>,
}

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    x: DVector<f32>,
    p: DMatrix<f32>,
    f: DMatrix<f32>,
    h: DMatrix<f32>,
    r: DMatrix<f32>,
    q: DMatrix<f32>,
}

impl KalmanFilter {
    pub fn new(model: KalmanModel) -> Result<Self> {
        let dim_x = model.x.len();
        let dim_z = model.h.nrows();

        if model.p.shape() != (dim_x, dim_x)
            || model.f.shape() != (dim_x, dim_x)
            || model.q.shape() != (dim_x, dim_x)
            || model.h.ncols() != dim_x
            || model.r.shape() != (dim_z, dim_z)
        {
            return Err(anyhow!(
                "inconsistent Kalman model dimensions (state {}, observation {})",
                dim_x,
                dim_z
            ));
        }

        Ok(Self {
            x: model.x,
            p: model.p,
            f: model.f,
            h: model.h,
            r: model.r,
            q: model.q,
        })
    }

    /// x = F x, P = F P F^T + Q
    pub fn predict(&mut self) {
        self.x = &self.f * &self.x;
        self.p = &self.f * &self.p * self.f.transpose() + &self.q;
    }

    /// Fold an observation into the state
    pub fn update(&mut self, z: &DVector<f32>) -> Result<()> {
        let residual = z - &self.h * &self.x;
        let innovation = &self.h * &self.p * self.h.transpose() + &self.r;
        let innovation_inv = innovation
            .try_inverse()
            .ok_or_else(|| anyhow!("innovation covariance is singular"))?;
        let gain = &self.p * self.h.transpose() * innovation_inv;

        self.x = &self.x + &gain * residual;
        let identity = DMatrix::<f32>::identity(self.x.len(), self.x.len());
        self.p = (identity - &gain * &self.h) * &self.p;
        Ok(())
    }

    pub fn state(&self) -> &DVector<f32> {
        &self.x
    }

    pub fn state_mut(&mut self) -> &mut DVector<f32> {
        &mut self.x
    }
}
