//! kinetree: articulated rigid-body kinematics and dynamics over a link tree.
//!
//! This is the umbrella crate that provides the `Simulator`, PD tracking control,
//! batched execution and virtual IMU sensors, and re-exports core types from
//! sub-crates.
//!
//! The six entry points used by downstream data generation and training are
//! [`forward_kinematics_transforms`], [`inverse_kinematics_endeffector`],
//! [`compute_mass_matrix`], [`inverse_dynamics`], [`forward_dynamics`] and
//! [`step`].

pub mod batch;
pub mod control;
pub mod sensors;

pub use control::PdController;

pub use kinetree_math::{self, DMat, DVec, Quat, SpatialVec, Transform, Vec3};
pub use kinetree_model::{
    self, Geometry, IntegrationMethod, JointModel, JointParams, JointRegistry, KinetreeError,
    Link, MotionConfig, Result, State, System, SystemBuilder, draw_q,
};
pub use kinetree_rigid::{
    self, IkOptions, IkSolution, compute_mass_matrix, forward_dynamics,
    forward_kinematics_transforms, inverse_dynamics, inverse_kinematics_endeffector, step,
};

/// Pluggable solver trait.
///
/// Implementations define how to advance the simulation by one timestep.
pub trait Solver: Send + Sync {
    /// Advance state by dt under generalized forces `tau`, writing the result back.
    fn step(&self, system: &System, state: &mut State, tau: &DVec) -> Result<()>;
}

/// Semi-implicit Euler integrator: velocity first, then position.
pub struct SemiImplicitEulerSolver;

impl Solver for SemiImplicitEulerSolver {
    fn step(&self, system: &System, state: &mut State, tau: &DVec) -> Result<()> {
        *state = kinetree_rigid::step_semi_implicit_euler(system, state, tau)?;
        Ok(())
    }
}

/// 4th-order Runge-Kutta integrator.
///
/// Much better energy conservation than semi-implicit Euler for systems
/// with configuration-dependent mass matrices (e.g., double pendulum).
pub struct Rk4Solver;

impl Solver for Rk4Solver {
    fn step(&self, system: &System, state: &mut State, tau: &DVec) -> Result<()> {
        *state = kinetree_rigid::step_rk4(system, state, tau)?;
        Ok(())
    }
}

/// Main simulation driver.
pub struct Simulator {
    solver: Box<dyn Solver>,
}

impl Simulator {
    /// Create a simulator with the default semi-implicit Euler solver.
    pub fn new() -> Self {
        Self {
            solver: Box::new(SemiImplicitEulerSolver),
        }
    }

    /// Create a simulator with the RK4 solver.
    pub fn rk4() -> Self {
        Self {
            solver: Box::new(Rk4Solver),
        }
    }

    /// Create a simulator with a custom solver.
    pub fn with_solver(solver: Box<dyn Solver>) -> Self {
        Self { solver }
    }

    /// Create a simulator using the integration method configured on `system`.
    pub fn for_system(system: &System) -> Self {
        match system.integration_method() {
            IntegrationMethod::SemiImplicitEuler => Self::new(),
            IntegrationMethod::Rk4 => Self::rk4(),
        }
    }

    /// Advance simulation by one timestep.
    pub fn step(&self, system: &System, state: &mut State, tau: &DVec) -> Result<()> {
        self.solver.step(system, state, tau)
    }

    /// Run simulation for `n` steps under constant `tau`.
    pub fn simulate(&self, system: &System, state: &mut State, n: usize, tau: &DVec) -> Result<()> {
        for _ in 0..n {
            self.step(system, state, tau)?;
        }
        Ok(())
    }

    /// Run one step per entry of `taus`, returning the state after each step.
    pub fn rollout(&self, system: &System, initial: &State, taus: &[DVec]) -> Result<Vec<State>> {
        let mut state = initial.clone();
        let mut trajectory = Vec::with_capacity(taus.len());
        for tau in taus {
            self.step(system, &mut state, tau)?;
            trajectory.push(state.clone());
        }
        Ok(trajectory)
    }

    /// Track the `T × q_size` reference `q_ref` with `controller`, one step per row.
    ///
    /// Step `k` is driven towards row `k`. Reference velocities default to
    /// [`control::reference_velocity`] of `q_ref` at the system's `dt`.
    pub fn rollout_pd(
        &self,
        system: &System,
        initial: &State,
        controller: &PdController,
        q_ref: &DMat,
        qd_ref: Option<&DMat>,
    ) -> Result<Vec<State>> {
        let derived;
        let qd_ref = match qd_ref {
            Some(qd_ref) => qd_ref,
            None => {
                derived = control::reference_velocity(system, q_ref, system.dt())?;
                &derived
            }
        };
        kinetree_model::error::check_len("reference rows", q_ref.nrows(), qd_ref.nrows())?;
        tracing::debug!(steps = q_ref.nrows(), "pd tracking rollout");

        let mut state = initial.clone();
        let mut trajectory = Vec::with_capacity(q_ref.nrows());
        for (q_k, qd_k) in q_ref.row_iter().zip(qd_ref.row_iter()) {
            let tau = controller.control(system, &state, &q_k.transpose(), &qd_k.transpose())?;
            self.step(system, &mut state, &tau)?;
            trajectory.push(state.clone());
        }
        Ok(trajectory)
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}
