use crate::config::IdmParameters;

/// The acceleration model of a vehicle for one step.
///
/// Starts from the free-road acceleration; every obstacle the vehicle must
/// respect can only lower it.
#[derive(Clone, Copy, Debug)]
pub struct AccelerationModel<'a> {
    params: &'a IdmParameters,
    desired_speed: f64,
    acc: f64,
}

impl<'a> AccelerationModel<'a> {
    /// Creates a new acceleration model for a vehicle travelling at `vel`.
    pub fn new(params: &'a IdmParameters, desired_speed: f64, vel: f64) -> Self {
        Self {
            params,
            desired_speed,
            acc: idm(params, vel, desired_speed, f64::INFINITY, 0.0),
        }
    }

    /// Gets the resulting acceleration, never below the emergency deceleration.
    pub fn acc(&self) -> f64 {
        f64::max(self.acc, -self.params.max_deceleration)
    }

    /// Follows a vehicle `net_dist` m ahead travelling at `their_vel`.
    pub fn follow_vehicle(&mut self, net_dist: f64, my_vel: f64, their_vel: f64) {
        let acc = idm(self.params, my_vel, self.desired_speed, net_dist, my_vel - their_vel);
        self.acc = f64::min(self.acc, acc);
    }

    /// Stops at a line `dist` m ahead.
    ///
    /// A line has no length, so the jam distance is added to the gap
    /// to let the vehicle come to rest on the line itself.
    pub fn stop_at_line(&mut self, dist: f64, my_vel: f64) {
        self.follow_vehicle(dist + self.params.jam_distance, my_vel, 0.0);
    }
}

/// The desired minimum gap `s*` of the intelligent driver model.
///
/// # Arguments
/// * `vel` - The velocity of the simulated vehicle (m/s).
/// * `appr` - The approach rate, own velocity minus the leader's (m/s).
pub fn desired_gap(params: &IdmParameters, vel: f64, appr: f64) -> f64 {
    let factor = 1.0 / (2.0 * (params.max_acceleration * params.comfortable_deceleration).sqrt());
    let dynamic = vel * params.time_headway + vel * appr * factor;
    params.jam_distance + f64::max(dynamic, 0.0)
}

/// Computes an acceleration using the intelligent driver model,
/// `a = a_max * (1 - (v / v0)^δ - (s* / s)^2)`.
///
/// A non-positive gap yields the emergency deceleration.
pub fn idm(params: &IdmParameters, vel: f64, desired_speed: f64, net_dist: f64, appr: f64) -> f64 {
    if net_dist <= 0.0 {
        return -params.max_deceleration;
    }
    let free = if desired_speed > 0.0 {
        (vel / desired_speed).powf(params.delta)
    } else {
        1.0
    };
    let term = desired_gap(params, vel, appr) / net_dist;
    let acc = params.max_acceleration * (1.0 - free - term * term);
    f64::max(acc, -params.max_deceleration)
}
