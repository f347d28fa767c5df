//! Hardware registers of a robot
//!
//! The VM never owns the robot. It reads and writes a fixed set of `sys.*`
//! registers through the [`Hardware`] trait, which the simulation implements,
//! and reaches sensor modules (walls, radar, ...) through [`Module`].

use crate::{error::Fault, value::Value};
use anyhow::anyhow;
use rand::Rng;

/// A sensor or actuator module reachable as `sys.<name>[.<path>]`.
///
/// Modules are also interrupt sources: the simulation raises them on the VM,
/// which jumps to the module's handler once interrupts are enabled.
pub trait Module {
    /// Read a value. `path` is what follows the module name, possibly empty.
    fn read(&self, path: &str) -> anyhow::Result<Value>;

    /// Write a value. Modules are read-only unless they say otherwise.
    fn write(&mut self, path: &str, _value: Value) -> anyhow::Result<()> {
        Err(anyhow!("'{}' is read-only", path))
    }

    /// Install (`Some(address)`) or remove (`None`) the interrupt handler
    fn set_handler(&mut self, path: &str, handler: Option<f64>) -> anyhow::Result<()>;

    /// Adjust when the module raises its interrupt
    fn set_sensitivity(&mut self, path: &str, param: Value) -> anyhow::Result<()>;

    /// Dispatch order among queued interrupts, lowest first
    fn priority(&self) -> i32;

    fn handler(&self) -> Option<f64>;
}

/// Registers the VM needs from the robot it drives. Angles are degrees.
pub trait Hardware {
    fn aim(&self) -> f64;
    fn set_aim(&mut self, degrees: f64);

    fn energy(&self) -> f64;

    /// Radar offset relative to the aim
    fn look(&self) -> f64;
    fn set_look(&mut self, offset: f64);

    /// Distance to whatever the radar sees
    fn range(&self) -> f64;

    fn position(&self) -> (f64, f64);

    fn velocity(&self) -> (f64, f64);
    fn set_velocity(&mut self, dx: f64, dy: f64);

    fn set_velocity_dx(&mut self, dx: f64) {
        let (_, dy) = self.velocity();
        self.set_velocity(dx, dy);
    }

    fn set_velocity_dy(&mut self, dy: f64) {
        let (dx, _) = self.velocity();
        self.set_velocity(dx, dy);
    }

    /// Velocity as speed and direction
    fn heading(&self) -> (f64, f64) {
        let (dx, dy) = self.velocity();
        (dx.hypot(dy), dy.atan2(dx).to_degrees())
    }

    fn set_heading(&mut self, speed: f64, degrees: f64) {
        let theta = degrees.to_radians();
        self.set_velocity(speed * theta.cos(), speed * theta.sin());
    }

    /// Energy loaded into the next shot
    fn bullet_energy(&self) -> f64;
    fn add_bullet_energy(&mut self, energy: f64);
    /// Discharge the weapon
    fn fire(&mut self);

    fn module(&mut self, name: &str) -> Option<&mut dyn Module>;
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Side {
    North,
    West,
    South,
    East,
}

impl Side {
    fn as_str(self) -> &'static str {
        match self {
            Side::North => "north",
            Side::West => "west",
            Side::South => "south",
            Side::East => "east",
        }
    }
}

/// The `sys.*` allow-list
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Register {
    Aim,
    Energy,
    Fire,
    Heading,
    Look,
    Random,
    Range,
    VelocityDx,
    VelocityDy,
    Velocity,
    /// Wall proximity, overall or towards one side
    Wall(Option<Side>),
    X,
    Y,
}

/// Module backing the `wall*` registers
pub const WALL_MODULE: &str = "wall";

impl Register {
    pub fn from_name(name: &str) -> Option<Self> {
        let register = match name {
            "aim" => Register::Aim,
            "energy" => Register::Energy,
            "fire" => Register::Fire,
            "heading" => Register::Heading,
            "look" => Register::Look,
            "random" => Register::Random,
            "range" => Register::Range,
            "velocity_dx" => Register::VelocityDx,
            "velocity_dy" => Register::VelocityDy,
            "velocity" => Register::Velocity,
            "wall" => Register::Wall(None),
            "wall_north" => Register::Wall(Some(Side::North)),
            "wall_west" => Register::Wall(Some(Side::West)),
            "wall_south" => Register::Wall(Some(Side::South)),
            "wall_east" => Register::Wall(Some(Side::East)),
            "x" => Register::X,
            "y" => Register::Y,
            _ => return None,
        };
        Some(register)
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::Aim => "aim",
            Register::Energy => "energy",
            Register::Fire => "fire",
            Register::Heading => "heading",
            Register::Look => "look",
            Register::Random => "random",
            Register::Range => "range",
            Register::VelocityDx => "velocity_dx",
            Register::VelocityDy => "velocity_dy",
            Register::Velocity => "velocity",
            Register::Wall(None) => "wall",
            Register::Wall(Some(Side::North)) => "wall_north",
            Register::Wall(Some(Side::West)) => "wall_west",
            Register::Wall(Some(Side::South)) => "wall_south",
            Register::Wall(Some(Side::East)) => "wall_east",
            Register::X => "x",
            Register::Y => "y",
        }
    }

    pub fn read<H, R>(self, hw: &mut H, rng: &mut R) -> Result<Value, Fault>
    where
        H: Hardware + ?Sized,
        R: Rng,
    {
        let value = match self {
            Register::Aim => Value::Number(hw.aim()),
            Register::Energy => Value::Number(hw.energy()),
            Register::Fire => Value::Number(hw.bullet_energy()),
            Register::Heading => {
                let (speed, degrees) = hw.heading();
                Value::pair(speed, degrees)
            }
            Register::Look => Value::Number(hw.look()),
            Register::Random => Value::Number(rng.gen::<f64>()),
            Register::Range => Value::Number(hw.range()),
            Register::VelocityDx => Value::Number(hw.velocity().0),
            Register::VelocityDy => Value::Number(hw.velocity().1),
            Register::Velocity => {
                let (dx, dy) = hw.velocity();
                Value::pair(dx, dy)
            }
            Register::Wall(side) => {
                let path = side.map_or("", Side::as_str);
                wall_module(hw)?.read(path)?
            }
            Register::X => Value::Number(hw.position().0),
            Register::Y => Value::Number(hw.position().1),
        };
        Ok(value)
    }

    /// Write a register. Some writes have side effects: `fire` discharges the weapon.
    pub fn write<H>(self, hw: &mut H, value: Value) -> Result<(), Fault>
    where
        H: Hardware + ?Sized,
    {
        match self {
            Register::Aim => hw.set_aim(value.as_number()),
            Register::Fire => {
                let energy = value.as_number();
                hw.add_bullet_energy(energy);
                if energy > 0.0 {
                    hw.fire();
                }
            }
            Register::Look => hw.set_look(value.as_number()),
            Register::VelocityDx => hw.set_velocity_dx(value.as_number()),
            Register::VelocityDy => hw.set_velocity_dy(value.as_number()),
            Register::Velocity | Register::Heading => {
                let (a, b) = value.as_pair().ok_or_else(|| Fault::ExpectedPair {
                    register: self.name().to_string(),
                    value: value.to_string(),
                })?;
                self.write_pair(hw, a, b)?;
            }
            Register::Wall(side) => {
                let path = side.map_or("", Side::as_str);
                wall_module(hw)?.write(path, value)?;
            }
            Register::Energy | Register::Random | Register::Range | Register::X | Register::Y => {
                return Err(Fault::ReadOnlyRegister(self.name().to_string()))
            }
        }
        Ok(())
    }

    /// Composite write of a register that holds a pair
    pub fn write_pair<H>(self, hw: &mut H, a: f64, b: f64) -> Result<(), Fault>
    where
        H: Hardware + ?Sized,
    {
        match self {
            Register::Velocity => hw.set_velocity(a, b),
            Register::Heading => hw.set_heading(a, b),
            _ => {
                return Err(Fault::ExpectedPair {
                    register: self.name().to_string(),
                    value: Value::pair(a, b).to_string(),
                })
            }
        }
        Ok(())
    }
}

fn wall_module<H: Hardware + ?Sized>(hw: &mut H) -> Result<&mut dyn Module, Fault> {
    hw.module(WALL_MODULE)
        .ok_or_else(|| Fault::UnknownModule(WALL_MODULE.to_string()))
}

/// Split `sys.wall.north` into the module name and the path inside it
pub fn module_path(path: &str) -> (&str, &str) {
    let path = path.strip_prefix("sys.").unwrap_or(path);
    match path.split_once('.') {
        Some((module, rest)) => (module, rest),
        None => (path, ""),
    }
}
