use std::collections::VecDeque;
use std::fmt::Display;

use tracing::debug;

use crate::{Cell, Design, DisplayItem, Net};

/// One uniquely-identified node of a flattened netlist. The entry's position
/// in [`Netlist::entries`] is its id; the nets inside `cell` reference entry
/// positions, never the construction-time arena.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub cell: Cell,
    /// The declared output width; `None` for pure side-effect actions.
    pub width: Option<u32>,
}

/// The terminal artifact of a design session: an ordered, deduplicated
/// collection of primitive nodes plus the recorded side-effect actions.
///
/// Every node reachable from the actions appears exactly once, identified by
/// its position. Deduplication is referential: a subgraph referenced from
/// several roots is emitted once and shared. Combinational entries only
/// reference ids smaller than their own; the `next`/`enable` inputs of a
/// [`Cell::Dff`] are the one exception (sequential feedback may point
/// forward).
pub struct Netlist {
    pub entries: Vec<Entry>,
    /// Ids of combinational entries in a valid single-cycle evaluation
    /// order. Constants, inputs, and flip-flop outputs are sources and do
    /// not appear.
    pub schedule: Vec<Net>,
    /// Ids of the side-effect action entries, in the order the actions were
    /// issued during description.
    pub actions: Vec<Net>,
}

impl Netlist {
    pub fn entry(&self, net: Net) -> &Entry {
        &self.entries[net.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Net, &Entry)> {
        self.entries.iter().enumerate().map(|(index, entry)| (Net::from_index(index), entry))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Mark {
    Unvisited,
    /// On the walk stack; reaching an open node again means the
    /// combinational subgraph is cyclic.
    Open,
    Done(u32),
}

enum Frame {
    Enter(usize),
    Exit(usize),
}

struct Flattener<'a> {
    design: &'a Design,
    marks: Vec<Mark>,
    entries: Vec<Entry>,
    schedule: Vec<Net>,
    /// Flip-flops numbered but not yet walked; processed after the roots so
    /// that feedback through storage never recurses.
    pending: VecDeque<(u32, usize)>,
}

impl Flattener<'_> {
    /// Emits the subgraph under the cell at `root` (arena index), assigning
    /// each reachable node a fresh id the first time it is reached, and
    /// returns the root's id.
    fn emit(&mut self, root: usize) -> Net {
        let mut stack = vec![Frame::Enter(root)];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(index) => {
                    match self.marks[index] {
                        Mark::Done(_) => continue,
                        Mark::Open => {
                            let name = self.design.cells()[index].name();
                            panic!("combinational cycle detected through {name} cell %{index}");
                        }
                        Mark::Unvisited => (),
                    }
                    let cell = self.design.cells()[index].clone();
                    if let Cell::Dff(flip_flop) = &cell {
                        // number the storage element now, walk its inputs
                        // later: this is what breaks feedback cycles
                        let width = flip_flop.output_width();
                        let id = self.push_entry(cell.clone(), Some(width));
                        self.marks[index] = Mark::Done(id);
                        self.pending.push_back((id, index));
                        continue;
                    }
                    self.marks[index] = Mark::Open;
                    stack.push(Frame::Exit(index));
                    cell.visit(|net| stack.push(Frame::Enter(net.index())));
                }
                Frame::Exit(index) => {
                    let mut cell = self.design.cells()[index].clone();
                    cell.visit_mut(|net| *net = self.resolved(net.index()));
                    let width = self.output_width(&cell);
                    let id = self.push_entry(cell, width);
                    self.marks[index] = Mark::Done(id);
                }
            }
        }
        match self.marks[root] {
            Mark::Done(id) => Net::from_index(id as usize),
            _ => unreachable!("root %{root} not resolved"),
        }
    }

    fn resolved(&self, index: usize) -> Net {
        match self.marks[index] {
            Mark::Done(id) => Net::from_index(id as usize),
            _ => unreachable!("operand %{index} used before it was emitted"),
        }
    }

    fn push_entry(&mut self, cell: Cell, width: Option<u32>) -> u32 {
        let id = self.entries.len() as u32;
        let scheduled = width.is_some() && !cell.is_sequential();
        self.entries.push(Entry { cell, width });
        if scheduled {
            self.schedule.push(Net::from_index(id as usize));
        }
        id
    }

    fn width_of(&self, net: Net) -> u32 {
        self.entries[net.index()].width.expect("operand entry has no output width")
    }

    fn output_width(&self, cell: &Cell) -> Option<u32> {
        match cell {
            Cell::Void(_) => unreachable!("placeholder cell survived sealing"),
            Cell::Const(value) => Some(value.width()),
            Cell::Not(arg) => Some(self.width_of(*arg)),
            Cell::And(lhs, _)
            | Cell::Or(lhs, _)
            | Cell::Xor(lhs, _)
            | Cell::Add(lhs, _)
            | Cell::Sub(lhs, _)
            | Cell::Mul(lhs, _)
            | Cell::UDiv(lhs, _)
            | Cell::UMod(lhs, _)
            | Cell::Shl(lhs, _)
            | Cell::UShr(lhs, _)
            | Cell::SShr(lhs, _) => Some(self.width_of(*lhs)),
            Cell::MulFull { lhs, rhs, .. } => Some(self.width_of(*lhs) + self.width_of(*rhs)),
            Cell::Eq(..) | Cell::ULt(..) | Cell::ULe(..) => Some(1),
            Cell::Mux { alts, .. } => Some(self.width_of(alts[0])),
            Cell::Slice { width, .. } => Some(*width),
            Cell::Concat { hi, lo } => Some(self.width_of(*hi) + self.width_of(*lo)),
            Cell::Dff(flip_flop) => Some(flip_flop.output_width()),
            Cell::RamRead { ram, .. } => Some(self.design.ram_data_width(*ram)),
            Cell::Input { width, .. } => Some(*width),
            Cell::Output { .. }
            | Cell::Display { .. }
            | Cell::Finish { .. }
            | Cell::RamCreate { .. }
            | Cell::RamWrite { .. } => None,
        }
    }

    fn run(mut self) -> Netlist {
        let roots: Vec<Net> = self.design.roots().clone();
        let mut actions = Vec::new();
        for root in roots {
            actions.push(self.emit(root.index()));
        }
        while let Some((id, index)) = self.pending.pop_front() {
            let (next, enable) = match &self.design.cells()[index] {
                Cell::Dff(flip_flop) => (flip_flop.next, flip_flop.enable),
                _ => unreachable!(),
            };
            let next = self.emit(next.index());
            let enable = self.emit(enable.index());
            match &mut self.entries[id as usize].cell {
                Cell::Dff(flip_flop) => {
                    flip_flop.next = next;
                    flip_flop.enable = enable;
                }
                _ => unreachable!(),
            }
        }
        debug!("flattened {} arena cells into {} entries", self.design.cells().len(), self.entries.len());
        Netlist { entries: self.entries, schedule: self.schedule, actions }
    }
}

impl Design {
    /// Seals the session and flattens it into a [`Netlist`].
    ///
    /// Taking the design by value guarantees the whole write log is complete
    /// before any element's read value is resolved: no further declaration,
    /// write, or action can follow.
    pub fn into_netlist(self) -> Netlist {
        self.seal();
        let marks = vec![Mark::Unvisited; self.cells().len()];
        Flattener {
            design: &self,
            marks,
            entries: Vec::new(),
            schedule: Vec::new(),
            pending: VecDeque::new(),
        }
        .run()
    }
}

impl Display for Netlist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, entry) in self.entries.iter().enumerate() {
            write!(f, "%{index}:{} = {}", entry.width.unwrap_or(0), entry.cell.name())?;
            match &entry.cell {
                Cell::Void(_) => unreachable!(),
                Cell::Const(value) => write!(f, " {value}")?,
                Cell::Not(arg) => write!(f, " {arg}")?,
                Cell::And(lhs, rhs)
                | Cell::Or(lhs, rhs)
                | Cell::Xor(lhs, rhs)
                | Cell::Add(lhs, rhs)
                | Cell::Sub(lhs, rhs)
                | Cell::Mul(lhs, rhs)
                | Cell::UDiv(lhs, rhs)
                | Cell::UMod(lhs, rhs)
                | Cell::Shl(lhs, rhs)
                | Cell::UShr(lhs, rhs)
                | Cell::SShr(lhs, rhs)
                | Cell::Eq(lhs, rhs)
                | Cell::ULt(lhs, rhs)
                | Cell::ULe(lhs, rhs) => write!(f, " {lhs} {rhs}")?,
                Cell::MulFull { lhs, rhs, .. } => write!(f, " {lhs} {rhs}")?,
                Cell::Mux { sel, alts } => {
                    write!(f, " {sel} [")?;
                    for alt in alts {
                        write!(f, " {alt}")?;
                    }
                    write!(f, " ]")?;
                }
                Cell::Slice { value, offset, .. } => write!(f, " {value} offset={offset}")?,
                Cell::Concat { hi, lo } => write!(f, " {hi} {lo}")?,
                Cell::Dff(flip_flop) => {
                    write!(f, " {} enable={} init={}", flip_flop.next, flip_flop.enable, flip_flop.init)?
                }
                Cell::RamRead { ram, addr } => write!(f, " {ram} {addr}")?,
                Cell::Input { name, .. } => write!(f, " {name:?}")?,
                Cell::Output { name, value } => write!(f, " {name:?} {value}")?,
                Cell::Display { cond, items } => {
                    write!(f, " {cond}")?;
                    for item in items {
                        match item {
                            DisplayItem::Text(text) => write!(f, " {text:?}")?,
                            DisplayItem::Value(net) => write!(f, " {net}")?,
                        }
                    }
                }
                Cell::Finish { cond } => write!(f, " {cond}")?,
                Cell::RamCreate { ram, addr_width, data_width, init } => {
                    write!(f, " {ram} addr_width={addr_width} data_width={data_width}")?;
                    if let Some(init) = init {
                        write!(f, " init={init:?}")?;
                    }
                }
                Cell::RamWrite { ram, cond, addr, data, .. } => write!(f, " {ram} {cond} {addr} {data}")?,
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
