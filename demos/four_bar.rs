use std::f64::consts::PI;

use kinechain::{
    ClosedChainSolver, Controller, Joint, KinematicSolver, Mechanism, SolverConfig,
};
use nalgebra::{Isometry3, UnitQuaternion, Vector3};

fn main() {
    tracing_subscriber::fmt::init();

    // crank 1, coupler ~2.06, rocker 1.5, ground 2: the crank turns all the way round
    let mut mechanism = Mechanism::new();
    mechanism.name = "four_bar".into();
    let crank = mechanism.add(Joint::revolute("crank", Isometry3::identity()).root());
    let coupler = mechanism.add(Joint::revolute("coupler", Isometry3::translation(0., 1., 0.)));
    let rocker = mechanism.add(Joint::revolute("rocker", Isometry3::translation(2., 1.5, 0.)));
    let ground = mechanism.add(Joint::revolute("ground", Isometry3::translation(2., 0., 0.)));
    mechanism.add_child(crank, coupler).unwrap();
    mechanism.add_child(coupler, rocker).unwrap();
    mechanism.add_child(rocker, ground).unwrap();
    mechanism.add_child(ground, crank).unwrap();

    let solver = ClosedChainSolver::new(mechanism, SolverConfig::default()).with_drive_rate(PI);
    let mut controller = Controller::new(solver);
    for joint in [crank, coupler, ground] {
        controller.bind(joint, |_: &Isometry3<f64>| {});
    }
    controller.bind(rocker, |pose: &Isometry3<f64>| {
        let p = pose.translation.vector;
        println!("rocker at ({:.4}, {:.4})", p.x, p.y);
    });
    controller.init().unwrap();
    controller.run();
    for _ in 0..10 {
        controller.tick(0.02).unwrap();
    }

    let step = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 2. * PI / 36.);
    let motion = controller
        .simulate_trajectory(rocker, 36, |joint| joint.rotate_local(&step))
        .unwrap();
    for (frame, point) in motion.trajectory.iter().enumerate() {
        println!("{frame:>2}: {:.4} {:.4}", point.x, point.y);
    }
    let solver = controller.solver();
    println!(
        "converged {}, loss {:.3e}, singularity {:.3e}",
        solver.converged(),
        solver.loss(),
        solver.singularity()
    );
}
