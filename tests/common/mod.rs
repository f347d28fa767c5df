#![allow(dead_code)]

use std::collections::HashMap;

use anyhow::anyhow;
use vml::{Config, Hardware, Module, Value, Vm};

/// A module that only remembers what it was told
#[derive(Default)]
pub struct Probe {
    pub priority: i32,
    pub handler: Option<f64>,
    pub limit: Option<Value>,
    pub readings: HashMap<String, f64>,
}

impl Module for Probe {
    fn read(&self, path: &str) -> anyhow::Result<Value> {
        self.readings
            .get(path)
            .map(|n| Value::Number(*n))
            .ok_or_else(|| anyhow!("probe has no '{}'", path))
    }

    fn set_handler(&mut self, _path: &str, handler: Option<f64>) -> anyhow::Result<()> {
        self.handler = handler;
        Ok(())
    }

    fn set_sensitivity(&mut self, _path: &str, param: Value) -> anyhow::Result<()> {
        self.limit = Some(param);
        Ok(())
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn handler(&self) -> Option<f64> {
        self.handler
    }
}

/// Robot double recording every actuator call
pub struct Robot {
    pub aim: f64,
    pub look: f64,
    pub energy: f64,
    pub velocity: (f64, f64),
    pub bullet: f64,
    pub shots: Vec<f64>,
    pub modules: HashMap<String, Probe>,
}

impl Default for Robot {
    fn default() -> Self {
        Robot {
            aim: 0.0,
            look: 0.0,
            energy: 100.0,
            velocity: (0.0, 0.0),
            bullet: 0.0,
            shots: Vec::new(),
            modules: HashMap::new(),
        }
    }
}

impl Robot {
    pub fn with(mut self, name: &str, probe: Probe) -> Self {
        self.modules.insert(name.to_string(), probe);
        self
    }
}

impl Hardware for Robot {
    fn aim(&self) -> f64 {
        self.aim
    }
    fn set_aim(&mut self, degrees: f64) {
        self.aim = degrees;
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
        120.0
    }
    fn position(&self) -> (f64, f64) {
        (50.0, 75.0)
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
        self.bullet += energy;
    }
    fn fire(&mut self) {
        self.shots.push(self.bullet);
        self.bullet = 0.0;
    }
    fn module(&mut self, name: &str) -> Option<&mut dyn Module> {
        self.modules.get_mut(name).map(|m| m as &mut dyn Module)
    }
}

pub fn load(source: &str) -> Vm {
    let config = Config {
        seed: Some(1),
        ..Config::default()
    };
    Vm::load("bot", source, config).unwrap()
}

pub fn steps(vm: &mut Vm, robot: &mut Robot, n: usize) {
    for _ in 0..n {
        vm.step(robot).unwrap();
    }
}
