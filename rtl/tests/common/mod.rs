//! A reference interpreter for flattened netlists, small enough to audit by
//! hand. Entries are evaluated in schedule order once per cycle; flip-flops
//! and register files commit at the cycle boundary. Values are limited to 64
//! bits, which every test here stays well under.
#![allow(dead_code)]

use std::collections::HashMap;

use silica_rtl::{Cell, ElemId, Net, Netlist};

pub struct Sim {
    netlist: Netlist,
    values: Vec<u64>,
    ram: HashMap<(ElemId, u64), u64>,
    inputs: HashMap<String, u64>,
    finished: bool,
}

fn mask(width: u32) -> u64 {
    if width >= 64 { u64::MAX } else { (1u64 << width) - 1 }
}

fn sign_extend(value: u64, width: u32) -> i64 {
    let shift = 64 - width.min(64);
    ((value << shift) as i64) >> shift
}

impl Sim {
    pub fn new(netlist: Netlist) -> Sim {
        let mut values = vec![0; netlist.entries.len()];
        for (net, entry) in netlist.iter() {
            match &entry.cell {
                Cell::Const(value) => values[net.index()] = value.as_u64(),
                Cell::Dff(flip_flop) => values[net.index()] = flip_flop.init.as_u64(),
                _ => (),
            }
        }
        Sim { netlist, values, ram: HashMap::new(), inputs: HashMap::new(), finished: false }
    }

    pub fn poke(&mut self, name: &str, value: u64) {
        self.inputs.insert(name.into(), value);
    }

    /// Reads the settled value of the named external output. Call after
    /// [`Sim::eval`] or [`Sim::step`].
    pub fn peek(&self, name: &str) -> u64 {
        for entry in &self.netlist.entries {
            if let Cell::Output { name: output_name, value } = &entry.cell {
                if output_name == name {
                    return self.value(*value);
                }
            }
        }
        panic!("no output named {name:?}");
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    fn value(&self, net: Net) -> u64 {
        self.values[net.index()]
    }

    fn width(&self, net: Net) -> u32 {
        self.netlist.entry(net).width.expect("operand entry has no output width")
    }

    /// One combinational settle of the whole netlist.
    pub fn eval(&mut self) {
        for (net, entry) in self.netlist.iter() {
            if let Cell::Input { name, width } = &entry.cell {
                self.values[net.index()] = self.inputs.get(name).copied().unwrap_or(0) & mask(*width);
            }
        }
        for index in 0..self.netlist.schedule.len() {
            let net = self.netlist.schedule[index];
            let entry = self.netlist.entry(net);
            let width = entry.width.expect("scheduled entry has no output width");
            let value = self.eval_cell(&entry.cell, width) & mask(width);
            self.values[net.index()] = value;
        }
    }

    fn eval_cell(&self, cell: &Cell, width: u32) -> u64 {
        match cell {
            Cell::Not(arg) => !self.value(*arg),
            Cell::And(lhs, rhs) => self.value(*lhs) & self.value(*rhs),
            Cell::Or(lhs, rhs) => self.value(*lhs) | self.value(*rhs),
            Cell::Xor(lhs, rhs) => self.value(*lhs) ^ self.value(*rhs),
            Cell::Add(lhs, rhs) => self.value(*lhs).wrapping_add(self.value(*rhs)),
            Cell::Sub(lhs, rhs) => self.value(*lhs).wrapping_sub(self.value(*rhs)),
            Cell::Mul(lhs, rhs) => self.value(*lhs).wrapping_mul(self.value(*rhs)),
            Cell::MulFull { lhs, rhs, signed } => {
                if *signed {
                    let lhs = sign_extend(self.value(*lhs), self.width(*lhs)) as i128;
                    let rhs = sign_extend(self.value(*rhs), self.width(*rhs)) as i128;
                    (lhs * rhs) as u64
                } else {
                    (self.value(*lhs) as u128 * self.value(*rhs) as u128) as u64
                }
            }
            Cell::UDiv(lhs, rhs) => {
                // division by zero yields all ones, the usual hardware rule
                let divisor = self.value(*rhs);
                if divisor == 0 { u64::MAX } else { self.value(*lhs) / divisor }
            }
            Cell::UMod(lhs, rhs) => {
                let divisor = self.value(*rhs);
                if divisor == 0 { self.value(*lhs) } else { self.value(*lhs) % divisor }
            }
            Cell::Shl(value, amount) => {
                let amount = self.value(*amount);
                if amount >= width as u64 { 0 } else { self.value(*value) << amount }
            }
            Cell::UShr(value, amount) => {
                let amount = self.value(*amount);
                if amount >= width as u64 { 0 } else { self.value(*value) >> amount }
            }
            Cell::SShr(value, amount) => {
                let amount = self.value(*amount).min(width as u64 - 1);
                (sign_extend(self.value(*value), width) >> amount) as u64
            }
            Cell::Eq(lhs, rhs) => (self.value(*lhs) == self.value(*rhs)) as u64,
            Cell::ULt(lhs, rhs) => (self.value(*lhs) < self.value(*rhs)) as u64,
            Cell::ULe(lhs, rhs) => (self.value(*lhs) <= self.value(*rhs)) as u64,
            Cell::Mux { sel, alts } => {
                let index = (self.value(*sel) as usize).min(alts.len() - 1);
                self.value(alts[index])
            }
            Cell::Slice { value, offset, width } => (self.value(*value) >> offset) & mask(*width),
            Cell::Concat { hi, lo } => (self.value(*hi) << self.width(*lo)) | self.value(*lo),
            Cell::RamRead { ram, addr } => {
                self.ram.get(&(*ram, self.value(*addr))).copied().unwrap_or(0)
            }
            cell => unreachable!("{} cell is not schedulable", cell.name()),
        }
    }

    /// Advances one clock cycle: settle combinationally, latch finish, then
    /// commit register-file writes and flip-flops atomically.
    pub fn step(&mut self) {
        self.eval();
        let mut ram_writes = Vec::new();
        for &action in &self.netlist.actions {
            match &self.netlist.entry(action).cell {
                Cell::Finish { cond } => {
                    if self.value(*cond) & 1 != 0 {
                        self.finished = true;
                    }
                }
                Cell::RamWrite { ram, cond, addr, data, .. } => {
                    if self.value(*cond) & 1 != 0 {
                        ram_writes.push(((*ram, self.value(*addr)), self.value(*data)));
                    }
                }
                _ => (),
            }
        }
        let mut dff_updates = Vec::new();
        for (net, entry) in self.netlist.iter() {
            if let Cell::Dff(flip_flop) = &entry.cell {
                if self.value(flip_flop.enable) & 1 != 0 {
                    let width = entry.width.expect("flip-flop entry has no output width");
                    dff_updates.push((net.index(), self.value(flip_flop.next) & mask(width)));
                }
            }
        }
        for (key, data) in ram_writes {
            self.ram.insert(key, data);
        }
        for (index, value) in dff_updates {
            self.values[index] = value;
        }
    }
}
