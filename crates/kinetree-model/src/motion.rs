//! Random joint trajectories for synthetic motion generation.
//!
//! Every channel (one joint angle or one translation) is a sequence of random
//! knots, separated by random time intervals, joined by cosine interpolation and
//! sampled at the system timestep.

use kinetree_math::{DMat, Quat};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};

use crate::{KinetreeError, Result, System};

/// Bounds for random motion drawing.
///
/// Angular rates are in rad/s, positional rates in m/s, times in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Trajectory duration.
    pub t: f64,
    /// Shortest interval between two knots.
    pub t_min: f64,
    /// Longest interval between two knots.
    pub t_max: f64,
    pub dang_min: f64,
    pub dang_max: f64,
    pub dang_min_free_spherical: f64,
    pub dang_max_free_spherical: f64,
    /// Smallest angle change between two knots.
    pub delta_ang_min: f64,
    /// Largest angle change between two knots.
    pub delta_ang_max: f64,
    pub delta_ang_min_free_spherical: f64,
    pub delta_ang_max_free_spherical: f64,
    pub dpos_min: f64,
    pub dpos_max: f64,
    pub pos_min: f64,
    pub pos_max: f64,
    /// Keep hinge angles within half a turn of their initial angle.
    pub range_of_motion_hinge: bool,
    pub ang0_min: f64,
    pub ang0_max: f64,
    pub pos0_min: f64,
    pub pos0_max: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            t: 60.0,
            t_min: 0.05,
            t_max: 0.30,
            dang_min: 0.1,
            dang_max: 3.0,
            dang_min_free_spherical: 0.1,
            dang_max_free_spherical: 3.0,
            delta_ang_min: 0.0,
            delta_ang_max: TAU,
            delta_ang_min_free_spherical: 0.0,
            delta_ang_max_free_spherical: TAU,
            dpos_min: 0.001,
            dpos_max: 0.7,
            pos_min: -2.5,
            pos_max: 2.5,
            range_of_motion_hinge: true,
            ang0_min: -PI,
            ang0_max: PI,
            pos0_min: 0.0,
            pos0_max: 0.0,
        }
    }
}

/// Rate and step bounds of one angular channel.
#[derive(Debug, Clone, Copy)]
struct AngleBounds {
    dang_min: f64,
    dang_max: f64,
    delta_min: f64,
    delta_max: f64,
}

impl MotionConfig {
    fn hinge_bounds(&self) -> AngleBounds {
        AngleBounds {
            dang_min: self.dang_min,
            dang_max: self.dang_max,
            delta_min: self.delta_ang_min,
            delta_max: self.delta_ang_max,
        }
    }

    fn free_spherical_bounds(&self) -> AngleBounds {
        AngleBounds {
            dang_min: self.dang_min_free_spherical,
            dang_max: self.dang_max_free_spherical,
            delta_min: self.delta_ang_min_free_spherical,
            delta_max: self.delta_ang_max_free_spherical,
        }
    }

    /// Whether every knot can satisfy both its rate and its step bounds.
    pub fn is_feasible(&self) -> bool {
        self.validate().is_ok()
    }

    /// Check the config, naming the first violated bound.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(KinetreeError::InfeasibleMotionConfig(msg));

        if !(self.t > 0.0) {
            return fail(format!("duration must be positive, got {}", self.t));
        }
        if !(self.t_min > 0.0 && self.t_min <= self.t_max) {
            return fail(format!(
                "knot interval must satisfy 0 < t_min <= t_max, got [{}, {}]",
                self.t_min, self.t_max
            ));
        }
        for (name, b) in [
            ("hinge", self.hinge_bounds()),
            ("free/spherical", self.free_spherical_bounds()),
        ] {
            if !(0.0 <= b.dang_min && b.dang_min <= b.dang_max) {
                return fail(format!(
                    "{name} rate bounds must satisfy 0 <= dang_min <= dang_max, got [{}, {}]",
                    b.dang_min, b.dang_max
                ));
            }
            if !(0.0 <= b.delta_min && b.delta_min <= b.delta_max) {
                return fail(format!(
                    "{name} step bounds must satisfy 0 <= delta_min <= delta_max, got [{}, {}]",
                    b.delta_min, b.delta_max
                ));
            }
            if !(b.dang_min * self.t_min < b.delta_max && b.dang_max * self.t_max > b.delta_min) {
                return fail(format!(
                    "{name} rates [{}, {}] cannot produce a step in [{}, {}] within [{}, {}] s",
                    b.dang_min, b.dang_max, b.delta_min, b.delta_max, self.t_min, self.t_max
                ));
            }
        }
        if !(0.0 <= self.dpos_min && self.dpos_min <= self.dpos_max) {
            return fail(format!(
                "position rate bounds must satisfy 0 <= dpos_min <= dpos_max, got [{}, {}]",
                self.dpos_min, self.dpos_max
            ));
        }
        if !(self.pos_min <= self.pos0_min
            && self.pos0_min <= self.pos0_max
            && self.pos0_max <= self.pos_max)
        {
            return fail(format!(
                "initial position [{}, {}] must lie within [{}, {}]",
                self.pos0_min, self.pos0_max, self.pos_min, self.pos_max
            ));
        }
        if !(self.ang0_min <= self.ang0_max) {
            return fail(format!(
                "initial angle bounds are reversed: [{}, {}]",
                self.ang0_min, self.ang0_max
            ));
        }
        Ok(())
    }

    /// Number of samples drawn at timestep `dt`.
    pub fn num_samples(&self, dt: f64) -> Result<usize> {
        if !(dt > 0.0) {
            return Err(KinetreeError::InfeasibleMotionConfig(format!(
                "timestep must be positive, got {dt}"
            )));
        }
        Ok((self.t / dt).round() as usize)
    }
}

/// Uniform sample in `[lo, hi)`; `lo` when the interval is empty.
fn uniform(rng: &mut StdRng, lo: f64, hi: f64) -> f64 {
    if hi > lo { rng.gen_range(lo..hi) } else { lo }
}

fn random_sign(rng: &mut StdRng) -> f64 {
    if rng.gen_bool(0.5) { 1.0 } else { -1.0 }
}

/// Take a step of magnitude `mag` from `y` in direction `sign`, turning around
/// if that would leave `range`, and clamping as a last resort.
fn bounded_step(y: f64, sign: f64, mag: f64, range: Option<(f64, f64)>) -> f64 {
    let next = y + sign * mag;
    match range {
        Some((lo, hi)) if next < lo || next > hi => (y - sign * mag).clamp(lo, hi),
        _ => next,
    }
}

/// Sample the knot sequence at `n` points spaced `dt` apart.
fn cosine_interpolate(knots_t: &[f64], knots_y: &[f64], n: usize, dt: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(n);
    let mut j = 0;
    for k in 0..n {
        let s = k as f64 * dt;
        while j + 2 < knots_t.len() && knots_t[j + 1] < s {
            j += 1;
        }
        let (t0, t1) = (knots_t[j], knots_t[j + 1]);
        let mu = ((s - t0) / (t1 - t0)).clamp(0.0, 1.0);
        let mu2 = (1.0 - (mu * PI).cos()) / 2.0;
        out.push(knots_y[j] * (1.0 - mu2) + knots_y[j + 1] * mu2);
    }
    out
}

fn angle_channel(
    config: &MotionConfig,
    bounds: AngleBounds,
    key_time: &mut StdRng,
    key_value: &mut StdRng,
    ang0: f64,
    dt: f64,
    range: Option<(f64, f64)>,
) -> Result<Vec<f64>> {
    config.validate()?;
    let n = config.num_samples(dt)?;
    let horizon = n as f64 * dt;

    // Intervals for which some step satisfies both the rate and the step bounds.
    let t_lo = config.t_min.max(bounds.delta_min / bounds.dang_max);
    let t_hi = if bounds.dang_min > 0.0 {
        config.t_max.min(bounds.delta_max / bounds.dang_min)
    } else {
        config.t_max
    };

    let mut knots_t = vec![0.0];
    let mut knots_y = vec![ang0];
    let mut time = 0.0;
    let mut phi = ang0;
    while knots_t.len() < 2 || time < horizon {
        let interval = uniform(key_time, t_lo, t_hi);
        let mag = uniform(
            key_value,
            (bounds.dang_min * interval).max(bounds.delta_min),
            (bounds.dang_max * interval).min(bounds.delta_max),
        );
        phi = bounded_step(phi, random_sign(key_value), mag, range);
        time += interval;
        knots_t.push(time);
        knots_y.push(phi);
    }
    Ok(cosine_interpolate(&knots_t, &knots_y, n, dt))
}

/// Random hinge-angle trajectory starting at `ang0`, one sample per `dt`.
pub fn random_angle_over_time(
    config: &MotionConfig,
    key_time: &mut StdRng,
    key_value: &mut StdRng,
    ang0: f64,
    dt: f64,
) -> Result<Vec<f64>> {
    let range = config
        .range_of_motion_hinge
        .then_some((ang0 - PI, ang0 + PI));
    angle_channel(config, config.hinge_bounds(), key_time, key_value, ang0, dt, range)
}

/// Random translation trajectory starting at `pos0`, kept within
/// `[pos_min, pos_max]`, one sample per `dt`.
pub fn random_position_over_time(
    config: &MotionConfig,
    key_time: &mut StdRng,
    key_value: &mut StdRng,
    pos0: f64,
    dt: f64,
) -> Result<Vec<f64>> {
    config.validate()?;
    let n = config.num_samples(dt)?;
    let horizon = n as f64 * dt;
    let range = Some((config.pos_min, config.pos_max));

    let mut knots_t = vec![0.0];
    let mut knots_y = vec![pos0];
    let mut time = 0.0;
    let mut pos = pos0;
    while knots_t.len() < 2 || time < horizon {
        let interval = uniform(key_time, config.t_min, config.t_max);
        let mag = uniform(key_value, config.dpos_min * interval, config.dpos_max * interval);
        pos = bounded_step(pos, random_sign(key_value), mag, range);
        time += interval;
        knots_t.push(time);
        knots_y.push(pos);
    }
    Ok(cosine_interpolate(&knots_t, &knots_y, n, dt))
}

fn column(values: Vec<f64>) -> DMat {
    let n = values.len();
    DMat::from_vec(n, 1, values)
}

/// Three random Euler channels turned into a `T x 4` quaternion block.
fn random_rotation(
    config: &MotionConfig,
    key_time: &mut StdRng,
    key_value: &mut StdRng,
    dt: f64,
) -> Result<DMat> {
    let mut channels = Vec::with_capacity(3);
    for _ in 0..3 {
        let ang0 = uniform(key_value, config.ang0_min, config.ang0_max);
        channels.push(angle_channel(
            config,
            config.free_spherical_bounds(),
            key_time,
            key_value,
            ang0,
            dt,
            None,
        )?);
    }
    let n = channels[0].len();
    let mut out = DMat::zeros(n, 4);
    for k in 0..n {
        let q = Quat::from_euler_xyz(channels[0][k], channels[1][k], channels[2][k]);
        for (c, v) in q.to_array().into_iter().enumerate() {
            out[(k, c)] = v;
        }
    }
    Ok(out)
}

/// Draw function of the built-in hinge joints.
pub fn draw_rxyz(
    config: &MotionConfig,
    key_time: &mut StdRng,
    key_value: &mut StdRng,
    dt: f64,
    _params: &[f64],
) -> Result<DMat> {
    let ang0 = uniform(key_value, config.ang0_min, config.ang0_max);
    random_angle_over_time(config, key_time, key_value, ang0, dt).map(column)
}

/// Draw function of the built-in slider joints.
pub fn draw_pxyz(
    config: &MotionConfig,
    key_time: &mut StdRng,
    key_value: &mut StdRng,
    dt: f64,
    _params: &[f64],
) -> Result<DMat> {
    let pos0 = uniform(key_value, config.pos0_min, config.pos0_max);
    random_position_over_time(config, key_time, key_value, pos0, dt).map(column)
}

pub fn draw_spherical(
    config: &MotionConfig,
    key_time: &mut StdRng,
    key_value: &mut StdRng,
    dt: f64,
    _params: &[f64],
) -> Result<DMat> {
    random_rotation(config, key_time, key_value, dt)
}

/// `[quaternion, position]` per sample.
pub fn draw_free(
    config: &MotionConfig,
    key_time: &mut StdRng,
    key_value: &mut StdRng,
    dt: f64,
    _params: &[f64],
) -> Result<DMat> {
    let rot = random_rotation(config, key_time, key_value, dt)?;
    let n = rot.nrows();
    let mut out = DMat::zeros(n, 7);
    out.columns_mut(0, 4).copy_from(&rot);
    for c in 0..3 {
        let pos0 = uniform(key_value, config.pos0_min, config.pos0_max);
        let pos = random_position_over_time(config, key_time, key_value, pos0, dt)?;
        for (k, p) in pos.into_iter().enumerate() {
            out[(k, 4 + c)] = p;
        }
    }
    Ok(out)
}

pub fn draw_frozen(
    config: &MotionConfig,
    _key_time: &mut StdRng,
    _key_value: &mut StdRng,
    dt: f64,
    _params: &[f64],
) -> Result<DMat> {
    config.validate()?;
    Ok(DMat::zeros(config.num_samples(dt)?, 0))
}

/// Draw a random `T x q_size` coordinate trajectory for the whole system.
///
/// Each link draws from its own pair of generators seeded from `rng`.
pub fn draw_q(system: &System, config: &MotionConfig, rng: &mut StdRng) -> Result<DMat> {
    config.validate()?;
    let dt = system.dt();
    let n = config.num_samples(dt)?;
    let mut out = DMat::zeros(n, system.q_size());

    for i in 0..system.num_links() {
        let model = system.joint_model(i);
        let mut key_time = StdRng::seed_from_u64(rng.gen());
        let mut key_value = StdRng::seed_from_u64(rng.gen());
        let draw = model.rcmg_draw.ok_or_else(|| {
            KinetreeError::InvalidJointModel(format!(
                "joint type `{}` has no random draw function",
                system.link_type(i)
            ))
        })?;
        let block = draw(config, &mut key_time, &mut key_value, dt, system.joint_params(i))?;
        if block.nrows() != n {
            return Err(KinetreeError::DimensionMismatch {
                what: "drawn trajectory length",
                expected: n,
                got: block.nrows(),
            });
        }
        if block.ncols() != model.q_width {
            return Err(KinetreeError::DimensionMismatch {
                what: "drawn trajectory width",
                expected: model.q_width,
                got: block.ncols(),
            });
        }
        out.columns_mut(system.q_offset(i), model.q_width)
            .copy_from(&block);
    }
    Ok(out)
}
