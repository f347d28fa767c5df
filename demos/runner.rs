//! Run a VML program on a toy robot in an empty arena.
//!
//! ```text
//! cargo run --example runner -- demos/spinner.vml [ticks]
//! ```

use std::{collections::HashMap, env, fs};

use anyhow::{anyhow, bail, Context};
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};
use vml::{Config, Hardware, Module, Value, Vm};

const ARENA: f64 = 500.0;
const WALL_DISTANCE: f64 = 20.0;
const TARGET: (f64, f64) = (400.0, 300.0);

/// Distances to the four arena walls
#[derive(Default)]
struct Walls {
    distances: HashMap<&'static str, f64>,
    handler: Option<f64>,
    limit: f64,
}

impl Walls {
    fn update(&mut self, (x, y): (f64, f64)) {
        self.distances.insert("north", y);
        self.distances.insert("south", ARENA - y);
        self.distances.insert("west", x);
        self.distances.insert("east", ARENA - x);
    }

    fn nearest(&self) -> f64 {
        self.distances.values().copied().fold(f64::INFINITY, f64::min)
    }
}

impl Module for Walls {
    fn read(&self, path: &str) -> anyhow::Result<Value> {
        if path.is_empty() {
            return Ok(Value::Number(self.nearest()));
        }
        self.distances
            .get(path)
            .map(|d| Value::Number(*d))
            .ok_or_else(|| anyhow!("no wall '{}'", path))
    }

    fn set_handler(&mut self, _path: &str, handler: Option<f64>) -> anyhow::Result<()> {
        self.handler = handler;
        Ok(())
    }

    fn set_sensitivity(&mut self, _path: &str, param: Value) -> anyhow::Result<()> {
        self.limit = param.as_number();
        Ok(())
    }

    fn priority(&self) -> i32 {
        0
    }

    fn handler(&self) -> Option<f64> {
        self.handler
    }
}

/// Sees the target when it is within `arc` degrees of where the radar points
struct Radar {
    arc: f64,
    handler: Option<f64>,
}

impl Module for Radar {
    fn read(&self, _path: &str) -> anyhow::Result<Value> {
        Ok(Value::Number(self.arc))
    }

    fn set_handler(&mut self, _path: &str, handler: Option<f64>) -> anyhow::Result<()> {
        self.handler = handler;
        Ok(())
    }

    fn set_sensitivity(&mut self, _path: &str, param: Value) -> anyhow::Result<()> {
        self.arc = param.as_number();
        Ok(())
    }

    fn priority(&self) -> i32 {
        1
    }

    fn handler(&self) -> Option<f64> {
        self.handler
    }
}

struct Chassis {
    position: (f64, f64),
    velocity: (f64, f64),
    aim: f64,
    look: f64,
    energy: f64,
    bullet: f64,
    shots: usize,
    walls: Walls,
    radar: Radar,
}

impl Chassis {
    fn new() -> Self {
        let mut walls = Walls {
            limit: WALL_DISTANCE,
            ..Walls::default()
        };
        let position = (ARENA / 2.0, ARENA / 2.0);
        walls.update(position);

        Chassis {
            position,
            velocity: (0.0, 0.0),
            aim: 0.0,
            look: 0.0,
            energy: 100.0,
            bullet: 0.0,
            shots: 0,
            walls,
            radar: Radar {
                arc: 10.0,
                handler: None,
            },
        }
    }

    fn bearing(&self) -> f64 {
        let (dx, dy) = (TARGET.0 - self.position.0, TARGET.1 - self.position.1);
        dy.atan2(dx).to_degrees()
    }

    fn sees_target(&self) -> bool {
        let off = (self.aim + self.look - self.bearing()).rem_euclid(360.0);
        off.min(360.0 - off) <= self.radar.arc / 2.0
    }

    /// Move one tick and report which modules want to interrupt
    fn advance(&mut self) -> Vec<&'static str> {
        let (x, y) = self.position;
        let (dx, dy) = self.velocity;
        self.position = ((x + dx).clamp(0.0, ARENA), (y + dy).clamp(0.0, ARENA));
        self.walls.update(self.position);

        let mut raised = Vec::new();
        if self.walls.nearest() < self.walls.limit {
            raised.push("wall");
        }
        if self.sees_target() {
            raised.push("radar");
        }
        raised
    }
}

impl Hardware for Chassis {
    fn aim(&self) -> f64 {
        self.aim
    }

    fn set_aim(&mut self, degrees: f64) {
        self.aim = degrees.rem_euclid(360.0);
    }

    fn energy(&self) -> f64 {
        self.energy
    }

    fn look(&self) -> f64 {
        self.look
    }

    fn set_look(&mut self, offset: f64) {
        self.look = offset;
    }

    fn range(&self) -> f64 {
        if self.sees_target() {
            let (dx, dy) = (TARGET.0 - self.position.0, TARGET.1 - self.position.1);
            dx.hypot(dy)
        } else {
            0.0
        }
    }

    fn position(&self) -> (f64, f64) {
        self.position
    }

    fn velocity(&self) -> (f64, f64) {
        self.velocity
    }

    fn set_velocity(&mut self, dx: f64, dy: f64) {
        self.velocity = (dx, dy);
    }

    fn bullet_energy(&self) -> f64 {
        self.bullet
    }

    fn add_bullet_energy(&mut self, energy: f64) {
        self.bullet = (self.bullet + energy).min(self.energy);
    }

    fn fire(&mut self) {
        self.energy -= self.bullet;
        self.bullet = 0.0;
        self.shots += 1;
    }

    fn module(&mut self, name: &str) -> Option<&mut dyn Module> {
        match name {
            "wall" => Some(&mut self.walls as &mut dyn Module),
            "radar" => Some(&mut self.radar as &mut dyn Module),
            _ => None,
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() -> anyhow::Result<()> {
    init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: runner <program.vml> [ticks]");
    }

    let path = &args[1];
    let ticks: usize = match args.get(2) {
        Some(n) => n.parse().with_context(|| format!("invalid tick count '{}'", n))?,
        None => 100,
    };

    let source = fs::read_to_string(path).with_context(|| format!("reading {}", path))?;
    let mut vm = Vm::load(path, &source, Config::default())?;
    let mut chassis = Chassis::new();

    for tick in 0..ticks {
        if chassis.energy <= 0.0 {
            info!(tick, "out of energy");
            break;
        }

        for module in chassis.advance() {
            vm.raise(&mut chassis, module)?;
        }
        vm.tick(&mut chassis)
            .with_context(|| format!("tick {}", tick))?;

        for line in vm.take_messages() {
            println!("{}", line);
        }
        for line in vm.take_trace() {
            debug!(tick, "{}", line);
        }
    }

    println!(
        "pc {} | position ({:.1}, {:.1}) | aim {:.1} | energy {:.1} | shots {}",
        vm.pc(),
        chassis.position.0,
        chassis.position.1,
        chassis.aim,
        chassis.energy,
        chassis.shots
    );
    Ok(())
}
