use std::cell::RefCell;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::{Cell, Const, DisplayItem, ElemId, FlipFlop, Net, Value};

/// A conditional write recorded by [`Design::assign`]: the enabling
/// condition, the target element, and the source net.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Write {
    pub cond: Net,
    pub target: ElemId,
    pub value: Net,
}

#[derive(Clone, Debug)]
pub(crate) enum Element {
    Reg { init: Const, out: Net },
    Wire { default: Const, out: Net, driven: Net },
    Ram { addr_width: u32, data_width: u32 },
}

/// Handle to a declared register. Reads see the value stored at the last
/// cycle boundary; writes recorded anywhere in the session take effect at the
/// next one.
#[derive(Clone, Copy, Debug)]
pub struct Reg {
    id: ElemId,
    out: Value,
}

impl Reg {
    /// The register's current value.
    pub fn out(self) -> Value {
        self.out
    }
}

/// Handle to a declared wire: a pass-through combinational value, not
/// storage. Reads see whatever is written in the same cycle, or the declared
/// default when no write fires.
#[derive(Clone, Copy, Debug)]
pub struct Wire {
    id: ElemId,
    out: Value,
    driven: Value,
}

impl Wire {
    /// The wire's current-cycle value.
    pub fn out(self) -> Value {
        self.out
    }

    /// 1-bit flag: is any write to this wire firing in the current cycle?
    pub fn driven(self) -> Value {
        self.driven
    }
}

/// Handle to a pulse register: holds a written value for exactly one cycle
/// after the write, then reverts to the default.
#[derive(Clone, Copy, Debug)]
pub struct Pulse {
    id: ElemId,
    width: u32,
    out: Value,
}

impl Pulse {
    /// The value written in the previous cycle, or the default.
    pub fn out(self) -> Value {
        self.out
    }
}

/// Handle to a declared register file.
#[derive(Clone, Copy, Debug)]
pub struct Ram {
    id: ElemId,
    addr_width: u32,
    data_width: u32,
}

impl Ram {
    pub fn addr_width(self) -> u32 {
        self.addr_width
    }

    pub fn data_width(self) -> u32 {
        self.data_width
    }
}

/// Anything [`Design::assign`] can write to: a register, a wire, or a pulse
/// register.
pub trait Target {
    fn id(&self) -> ElemId;
    fn width(&self) -> u32;
}

impl Target for Reg {
    fn id(&self) -> ElemId {
        self.id
    }

    fn width(&self) -> u32 {
        self.out.width()
    }
}

impl Target for Wire {
    fn id(&self) -> ElemId {
        self.id
    }

    fn width(&self) -> u32 {
        self.out.width()
    }
}

impl Target for Pulse {
    fn id(&self) -> ElemId {
        self.id
    }

    fn width(&self) -> u32 {
        self.width
    }
}

fn check_same_width(op: &str, lhs: Value, rhs: Value) {
    if lhs.width() != rhs.width() {
        panic!("{op}: operand widths differ ({} vs {})", lhs.width(), rhs.width());
    }
}

/// A circuit description session.
///
/// A design is a sea of [`Cell`]s in a contiguous arena, connected by
/// [`Net`]s that refer back to cells by index, together with the builder
/// state that sequential description accumulates: the stack of in-scope
/// conditions, the table of declared mutable elements, the append-only
/// conditional-write log, and the list of side-effect actions.
///
/// All methods take `&self`; the session is single-threaded and uses
/// interior mutability. Description order only determines the order in which
/// writes are logged — an element may be read before the statement that
/// writes it, enabling same-cycle feedback. Resolution of every read against
/// the complete write log happens once, inside [`Design::into_netlist`],
/// which consumes the session and thereby guarantees the log is sealed
/// first.
pub struct Design {
    cells: RefCell<Vec<Cell>>,
    conds: RefCell<Vec<Net>>,
    elements: RefCell<IndexMap<ElemId, Element>>,
    writes: RefCell<Vec<Write>>,
    roots: RefCell<Vec<Net>>,
    next_elem: RefCell<u32>,
    bit_nets: RefCell<[Option<Net>; 2]>,
}

impl Design {
    pub fn new() -> Design {
        Design {
            cells: RefCell::new(Vec::new()),
            conds: RefCell::new(Vec::new()),
            elements: RefCell::new(IndexMap::new()),
            writes: RefCell::new(Vec::new()),
            roots: RefCell::new(Vec::new()),
            next_elem: RefCell::new(0),
            bit_nets: RefCell::new([None; 2]),
        }
    }

    pub(crate) fn add_cell(&self, cell: Cell, width: u32) -> Value {
        let mut cells = self.cells.borrow_mut();
        let net = Net::from_index(cells.len());
        cells.push(cell);
        Value::new(net, width)
    }

    fn add_action(&self, cell: Cell) {
        let value = self.add_cell(cell, 0);
        self.roots.borrow_mut().push(value.net());
    }

    /// A cached constant `0` or `1` net, shared by condition plumbing.
    fn bit_net(&self, bit: bool) -> Net {
        let cached = self.bit_nets.borrow()[bit as usize];
        if let Some(net) = cached {
            return net;
        }
        let net = self.add_cell(Cell::Const(Const::from(bit)), 1).net();
        self.bit_nets.borrow_mut()[bit as usize] = Some(net);
        net
    }

    fn fresh_id(&self) -> ElemId {
        let mut next_elem = self.next_elem.borrow_mut();
        let id = ElemId(*next_elem);
        *next_elem = next_elem.checked_add(1).expect("mutable element ids exhausted");
        id
    }

    pub(crate) fn cells(&self) -> std::cell::Ref<'_, Vec<Cell>> {
        self.cells.borrow()
    }

    pub(crate) fn roots(&self) -> std::cell::Ref<'_, Vec<Net>> {
        self.roots.borrow()
    }

    pub(crate) fn ram_data_width(&self, ram: ElemId) -> u32 {
        match &self.elements.borrow()[&ram] {
            Element::Ram { data_width, .. } => *data_width,
            _ => unreachable!("element {ram} is not a register file"),
        }
    }

    // ------------------------------------------------------------------
    // Literals

    /// Adds a constant cell. The value's width is the constant's width.
    pub fn constant(&self, value: Const) -> Value {
        assert!(!value.is_empty(), "constant: zero-width value");
        let width = value.width();
        self.add_cell(Cell::Const(value), width)
    }

    /// Adds a constant cell of given width from the low bits of `value`;
    /// bits beyond the width are discarded (two's-complement wraparound).
    pub fn lit(&self, value: u64, width: u32) -> Value {
        self.constant(Const::from_u64(value, width))
    }

    pub fn zero(&self, width: u32) -> Value {
        self.constant(Const::zero(width))
    }

    pub fn ones(&self, width: u32) -> Value {
        self.constant(Const::ones(width))
    }

    // ------------------------------------------------------------------
    // Bit-vector algebra

    pub fn not(&self, arg: Value) -> Value {
        self.add_cell(Cell::Not(arg.net()), arg.width())
    }

    pub fn and(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("and", lhs, rhs);
        self.add_cell(Cell::And(lhs.net(), rhs.net()), lhs.width())
    }

    pub fn or(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("or", lhs, rhs);
        self.add_cell(Cell::Or(lhs.net(), rhs.net()), lhs.width())
    }

    pub fn xor(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("xor", lhs, rhs);
        self.add_cell(Cell::Xor(lhs.net(), rhs.net()), lhs.width())
    }

    /// Unsigned wraparound addition of equal-width operands.
    pub fn add(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("add", lhs, rhs);
        self.add_cell(Cell::Add(lhs.net(), rhs.net()), lhs.width())
    }

    pub fn sub(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("sub", lhs, rhs);
        self.add_cell(Cell::Sub(lhs.net(), rhs.net()), lhs.width())
    }

    /// Wraparound multiply; the result is truncated to the operand width.
    pub fn mul(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("mul", lhs, rhs);
        self.add_cell(Cell::Mul(lhs.net(), rhs.net()), lhs.width())
    }

    /// Full-precision multiply: the output width is the sum of the operand
    /// widths, and `signed` selects the interpretation of both operands.
    pub fn mul_full(&self, lhs: Value, rhs: Value, signed: bool) -> Value {
        let width = lhs.width() + rhs.width();
        self.add_cell(Cell::MulFull { lhs: lhs.net(), rhs: rhs.net(), signed }, width)
    }

    pub fn udiv(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("udiv", lhs, rhs);
        self.add_cell(Cell::UDiv(lhs.net(), rhs.net()), lhs.width())
    }

    pub fn umod(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("umod", lhs, rhs);
        self.add_cell(Cell::UMod(lhs.net(), rhs.net()), lhs.width())
    }

    /// Logical shift left. The shift amount may have any width; amounts that
    /// reach past the value width give an all-zero result.
    pub fn shl(&self, value: Value, amount: Value) -> Value {
        self.add_cell(Cell::Shl(value.net(), amount.net()), value.width())
    }

    /// Logical shift right; out-of-range amounts give an all-zero result.
    pub fn ushr(&self, value: Value, amount: Value) -> Value {
        self.add_cell(Cell::UShr(value.net(), amount.net()), value.width())
    }

    /// Arithmetic shift right; out-of-range amounts give a sign-filled
    /// result.
    pub fn sshr(&self, value: Value, amount: Value) -> Value {
        self.add_cell(Cell::SShr(value.net(), amount.net()), value.width())
    }

    // ------------------------------------------------------------------
    // Comparisons (1-bit results; unsigned unless prefixed `s`)

    pub fn eq(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("eq", lhs, rhs);
        self.add_cell(Cell::Eq(lhs.net(), rhs.net()), 1)
    }

    pub fn ne(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("ne", lhs, rhs);
        let eq = self.eq(lhs, rhs);
        self.not(eq)
    }

    pub fn ult(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("ult", lhs, rhs);
        self.add_cell(Cell::ULt(lhs.net(), rhs.net()), 1)
    }

    pub fn ule(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("ule", lhs, rhs);
        self.add_cell(Cell::ULe(lhs.net(), rhs.net()), 1)
    }

    pub fn ugt(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("ugt", lhs, rhs);
        self.ult(rhs, lhs)
    }

    pub fn uge(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("uge", lhs, rhs);
        self.ule(rhs, lhs)
    }

    /// Inverts the most significant bit, mapping two's-complement order onto
    /// unsigned order. Signed comparisons are exactly unsigned comparisons
    /// of both operands passed through this.
    fn flip_msb(&self, value: Value) -> Value {
        let mask = Const::from_iter((0..value.width()).map(|index| index == value.width() - 1));
        let mask = self.constant(mask);
        self.xor(value, mask)
    }

    pub fn slt(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("slt", lhs, rhs);
        self.ult(self.flip_msb(lhs), self.flip_msb(rhs))
    }

    pub fn sle(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("sle", lhs, rhs);
        self.ule(self.flip_msb(lhs), self.flip_msb(rhs))
    }

    pub fn sgt(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("sgt", lhs, rhs);
        self.slt(rhs, lhs)
    }

    pub fn sge(&self, lhs: Value, rhs: Value) -> Value {
        check_same_width("sge", lhs, rhs);
        self.sle(rhs, lhs)
    }

    // ------------------------------------------------------------------
    // Width changing

    /// Extracts a bit range, low bit first. Whole-value slices return the
    /// value unchanged.
    pub fn slice(&self, value: Value, range: impl std::ops::RangeBounds<u32>) -> Value {
        use std::ops::Bound;
        let start = match range.start_bound() {
            Bound::Unbounded => 0,
            Bound::Included(&bound) => bound,
            Bound::Excluded(&bound) => bound + 1,
        };
        let end = match range.end_bound() {
            Bound::Unbounded => value.width(),
            Bound::Included(&bound) => bound + 1,
            Bound::Excluded(&bound) => bound,
        };
        if start > end || end > value.width() {
            panic!("slice: bit range {start}..{end} out of range for width {}", value.width());
        }
        if start == end {
            panic!("slice: empty bit range {start}..{end}");
        }
        if start == 0 && end == value.width() {
            return value;
        }
        self.add_cell(Cell::Slice { value: value.net(), offset: start, width: end - start }, end - start)
    }

    /// Extracts a single bit.
    pub fn bit(&self, value: Value, index: u32) -> Value {
        if index >= value.width() {
            panic!("bit: index {index} out of range for width {0} (valid range 0..{0})", value.width());
        }
        if value.width() == 1 {
            return value;
        }
        self.add_cell(Cell::Slice { value: value.net(), offset: index, width: 1 }, 1)
    }

    /// Concatenation; `hi` occupies the most-significant position and the
    /// output width is the sum of the operand widths.
    pub fn concat(&self, hi: Value, lo: Value) -> Value {
        self.add_cell(Cell::Concat { hi: hi.net(), lo: lo.net() }, hi.width() + lo.width())
    }

    /// Replicates a value `count` times.
    pub fn repeat(&self, value: Value, count: u32) -> Value {
        assert!(count > 0, "repeat: count must be positive");
        let mut result = value;
        for _ in 1..count {
            result = self.concat(result, value);
        }
        result
    }

    pub fn zext(&self, value: Value, width: u32) -> Value {
        if width < value.width() {
            panic!("zext: target width {width} is narrower than source width {}", value.width());
        }
        if width == value.width() {
            return value;
        }
        self.concat(self.zero(width - value.width()), value)
    }

    pub fn sext(&self, value: Value, width: u32) -> Value {
        if width < value.width() {
            panic!("sext: target width {width} is narrower than source width {}", value.width());
        }
        if width == value.width() {
            return value;
        }
        let msb = self.bit(value, value.width() - 1);
        self.concat(self.repeat(msb, width - value.width()), value)
    }

    pub fn trunc(&self, value: Value, width: u32) -> Value {
        if width > value.width() {
            panic!("trunc: target width {width} is wider than source width {}", value.width());
        }
        self.slice(value, 0..width)
    }

    // ------------------------------------------------------------------
    // Multiplexing

    /// Index-based multiplexer: the numeric value of `sel` indexes `alts`.
    /// All alternatives must have equal widths and the list must be
    /// non-empty; selector values beyond the list select the last
    /// alternative.
    pub fn mux(&self, sel: Value, alts: &[Value]) -> Value {
        if alts.is_empty() {
            panic!("mux: empty alternative list");
        }
        let width = alts[0].width();
        for (index, alt) in alts.iter().enumerate() {
            if alt.width() != width {
                panic!("mux: alternative {index} has width {} but alternative 0 has width {width}", alt.width());
            }
        }
        let alts = alts.iter().map(|alt| alt.net()).collect();
        self.add_cell(Cell::Mux { sel: sel.net(), alts }, width)
    }

    /// Priority multiplexer: selects the value of the first arm whose 1-bit
    /// guard is true, or `default` when none is. Distinct from [`mux`],
    /// which is index-based.
    ///
    /// [`mux`]: Design::mux
    pub fn pmux(&self, arms: &[(Value, Value)], default: Value) -> Value {
        let mut result = default;
        for (index, &(guard, value)) in arms.iter().enumerate().rev() {
            if guard.width() != 1 {
                panic!("pmux: guard {index} must be 1 bit wide, got {}", guard.width());
            }
            check_same_width("pmux", value, default);
            result = self.add_cell(
                Cell::Mux { sel: guard.net(), alts: vec![result.net(), value.net()] },
                default.width(),
            );
        }
        result
    }

    // ------------------------------------------------------------------
    // Bit lists

    /// Decomposes a value into single-bit values, most significant first.
    pub fn bits(&self, value: Value) -> Vec<Value> {
        (0..value.width()).rev().map(|index| self.bit(value, index)).collect()
    }

    /// Reassembles single-bit values, most significant first, into one value
    /// of the given width. Exact inverse of [`bits`].
    ///
    /// [`bits`]: Design::bits
    pub fn from_bits(&self, width: u32, bits: &[Value]) -> Value {
        if width == 0 || bits.len() != width as usize {
            panic!("from_bits: bit list length {} does not match width {width}", bits.len());
        }
        for (index, bit) in bits.iter().enumerate() {
            if bit.width() != 1 {
                panic!("from_bits: element {index} has width {}, expected 1", bit.width());
            }
        }
        let mut result = bits[0];
        for &bit in &bits[1..] {
            result = self.concat(result, bit);
        }
        result
    }

    /// A registered (one-cycle-delayed) copy of `value`, holding `init` at
    /// the beginning of time.
    pub fn dff(&self, value: Value, init: Const) -> Value {
        if init.width() != value.width() {
            panic!("dff: initial value width {} does not match data width {}", init.width(), value.width());
        }
        let enable = self.bit_net(true);
        let width = value.width();
        self.add_cell(Cell::Dff(FlipFlop { next: value.net(), enable, init }), width)
    }

    // ------------------------------------------------------------------
    // Conditions

    /// The conjunction of all conditions currently in scope. Outside any
    /// [`when`] body this is the constant `1`.
    ///
    /// [`when`]: Design::when
    pub fn current_condition(&self) -> Value {
        let net = match self.conds.borrow().last() {
            Some(&net) => net,
            None => self.bit_net(true),
        };
        Value::new(net, 1)
    }

    /// Runs `body` with the current condition narrowed by conjunction with
    /// `cond`, restoring the enclosing condition afterwards. Conditions
    /// compose by conjunction only.
    pub fn when(&self, cond: Value, body: impl FnOnce()) {
        if cond.width() != 1 {
            panic!("when: condition must be 1 bit wide, got {}", cond.width());
        }
        let enclosing = self.conds.borrow().last().copied();
        let net = match enclosing {
            None => cond.net(),
            Some(enclosing) => self.add_cell(Cell::And(enclosing, cond.net()), 1).net(),
        };
        self.conds.borrow_mut().push(net);
        body();
        self.conds.borrow_mut().pop();
    }

    /// Dispatches on `subject`, one [`Switch::case`] at a time.
    pub fn switch(&self, subject: Value) -> Switch<'_> {
        Switch { design: self, subject }
    }

    // ------------------------------------------------------------------
    // Mutable elements

    /// Declares a register of given width holding `init` at the beginning of
    /// time. May be declared at any point; reads are valid before textually
    /// later writes.
    pub fn reg(&self, width: u32, init: u64) -> Reg {
        self.reg_init(Const::from_u64(init, width))
    }

    /// Declares a register from an explicit initial constant.
    pub fn reg_init(&self, init: Const) -> Reg {
        assert!(!init.is_empty(), "reg: zero-width register");
        let id = self.fresh_id();
        let out = self.add_cell(Cell::Void(init.width()), init.width());
        self.elements.borrow_mut().insert(id, Element::Reg { init, out: out.net() });
        Reg { id, out }
    }

    /// Declares a wire of given width with the given default value.
    pub fn wire(&self, width: u32, default: u64) -> Wire {
        self.wire_default(Const::from_u64(default, width))
    }

    /// Declares a wire from an explicit default constant.
    pub fn wire_default(&self, default: Const) -> Wire {
        assert!(!default.is_empty(), "wire: zero-width wire");
        let width = default.width();
        let id = self.fresh_id();
        let out = self.add_cell(Cell::Void(width), width);
        let driven = self.add_cell(Cell::Void(1), 1);
        self.elements.borrow_mut().insert(id, Element::Wire { default, out: out.net(), driven: driven.net() });
        Wire { id, out, driven }
    }

    /// Declares a pulse register: writes address an internal wire, and the
    /// externally visible value is that wire registered through a flip-flop
    /// initialised to the default. A written value is therefore visible for
    /// exactly one cycle, after which the output reverts to `default`.
    pub fn pulse(&self, width: u32, default: u64) -> Pulse {
        let wire = self.wire(width, default);
        let reg = self.reg(width, default);
        // runs every cycle, regardless of any enclosing condition
        self.record_write(self.bit_net(true), reg.id, wire.out().net());
        Pulse { id: wire.id, width, out: reg.out() }
    }

    /// Declares a register file with the given address and data widths.
    /// `init` names an initial-contents source for the downstream consumer;
    /// this core does not interpret it.
    pub fn ram(&self, addr_width: u32, data_width: u32, init: Option<&str>) -> Ram {
        assert!(addr_width > 0, "ram: zero address width");
        assert!(data_width > 0, "ram: zero data width");
        let id = self.fresh_id();
        self.elements.borrow_mut().insert(id, Element::Ram { addr_width, data_width });
        self.add_action(Cell::RamCreate { ram: id, addr_width, data_width, init: init.map(String::from) });
        Ram { id, addr_width, data_width }
    }

    /// Combinational register-file read at `addr`.
    pub fn ram_read(&self, ram: Ram, addr: Value) -> Value {
        if addr.width() != ram.addr_width {
            panic!("ram_read: address width {} does not match register file address width {}", addr.width(), ram.addr_width);
        }
        self.add_cell(Cell::RamRead { ram: ram.id, addr: addr.net() }, ram.data_width)
    }

    /// Records a register-file write under the current condition, effective
    /// at the next cycle boundary.
    ///
    /// When several writes to one register file fire in the same cycle, the
    /// result is unspecified: every write event is preserved in the netlist
    /// and no precedence among them is defined, unlike register and wire
    /// writes, which resolve first-listed-wins.
    pub fn ram_write(&self, ram: Ram, addr: Value, data: Value) {
        if addr.width() != ram.addr_width {
            panic!("ram_write: address width {} does not match register file address width {}", addr.width(), ram.addr_width);
        }
        if data.width() != ram.data_width {
            panic!("ram_write: data width {} does not match register file data width {}", data.width(), ram.data_width);
        }
        self.add_action(Cell::RamWrite {
            ram: ram.id,
            addr_width: ram.addr_width,
            data_width: ram.data_width,
            cond: self.current_condition().net(),
            addr: addr.net(),
            data: data.net(),
        });
    }

    /// Records a conditional write of `value` to `target` under the current
    /// condition. All writes are logged; precedence between overlapping
    /// writes to one target is resolved first-listed-wins when the session
    /// is sealed.
    pub fn assign(&self, target: impl Target, value: Value) {
        if value.width() != target.width() {
            panic!("assign: value width {} does not match target width {}", value.width(), target.width());
        }
        self.record_write(self.current_condition().net(), target.id(), value.net());
    }

    fn record_write(&self, cond: Net, target: ElemId, value: Net) {
        trace!("write to {target} under {cond}");
        self.writes.borrow_mut().push(Write { cond, target, value });
    }

    // ------------------------------------------------------------------
    // Side-effect actions

    /// Declares a named external input of given width.
    pub fn input(&self, name: &str, width: u32) -> Value {
        assert!(width > 0, "input: zero-width input");
        let value = self.add_cell(Cell::Input { name: name.into(), width }, width);
        self.roots.borrow_mut().push(value.net());
        value
    }

    /// Declares a named external output driven by `value`.
    pub fn output(&self, name: &str, value: Value) {
        self.add_action(Cell::Output { name: name.into(), value: value.net() });
    }

    /// Records a display action fired under the current condition.
    pub fn display(&self, items: impl IntoIterator<Item = DisplayItem>) {
        let cond = self.current_condition().net();
        self.add_action(Cell::Display { cond, items: items.into_iter().collect() });
    }

    /// Records a finish action: simulation ends when the current condition
    /// holds. This is a data value handed to the consumer, not a control
    /// transfer.
    pub fn finish(&self) {
        let cond = self.current_condition().net();
        self.add_action(Cell::Finish { cond });
    }

    // ------------------------------------------------------------------
    // Sealing

    /// Resolves every mutable element against the complete write log,
    /// replacing its placeholder cell in place. Runs exactly once, from
    /// [`Design::into_netlist`].
    pub(crate) fn seal(&self) {
        let elements: Vec<(ElemId, Element)> =
            self.elements.borrow().iter().map(|(&id, element)| (id, element.clone())).collect();
        let writes = self.writes.borrow().clone();
        for (id, element) in elements {
            let entries: Vec<&Write> = writes.iter().filter(|write| write.target == id).collect();
            match element {
                Element::Reg { init, out } => {
                    if entries.is_empty() {
                        debug!("register {id} is never written; pinned to {init}");
                        self.cells.borrow_mut()[out.index()] = Cell::Const(init);
                        continue;
                    }
                    debug!("resolving register {id}: {} conditional writes", entries.len());
                    let width = init.width();
                    let next = self.fold_priority(&entries, width);
                    let enable = self.fold_any_cond(&entries);
                    self.cells.borrow_mut()[out.index()] = Cell::Dff(FlipFlop { next, enable, init });
                }
                Element::Wire { default, out, driven } => {
                    let width = default.width();
                    if entries.is_empty() {
                        debug!("wire {id} is never written; pinned to {default}");
                        self.cells.borrow_mut()[out.index()] = Cell::Const(default);
                        self.cells.borrow_mut()[driven.index()] = Cell::Const(Const::zero(1));
                        continue;
                    }
                    debug!("resolving wire {id}: {} conditional writes", entries.len());
                    // fallback alternative, selected when no guard fires
                    let mut alt = self.add_cell(Cell::Const(default), width).net();
                    for write in entries[1..].iter().rev() {
                        alt = self
                            .add_cell(Cell::Mux { sel: write.cond, alts: vec![alt, write.value] }, width)
                            .net();
                    }
                    self.cells.borrow_mut()[out.index()] =
                        Cell::Mux { sel: entries[0].cond, alts: vec![alt, entries[0].value] };
                    let mut any = self.bit_net(false);
                    for write in entries[1..].iter().rev() {
                        any = self.add_cell(Cell::Or(write.cond, any), 1).net();
                    }
                    self.cells.borrow_mut()[driven.index()] = Cell::Or(entries[0].cond, any);
                }
                Element::Ram { .. } => (),
            }
        }
    }

    /// Priority selection over the write list: the first listed write whose
    /// condition holds wins. A single write degrades to a direct connection.
    fn fold_priority(&self, entries: &[&Write], width: u32) -> Net {
        let mut next = entries.last().unwrap().value;
        for write in entries[..entries.len() - 1].iter().rev() {
            next = self.add_cell(Cell::Mux { sel: write.cond, alts: vec![next, write.value] }, width).net();
        }
        next
    }

    fn fold_any_cond(&self, entries: &[&Write]) -> Net {
        let mut any = entries[0].cond;
        for write in &entries[1..] {
            any = self.add_cell(Cell::Or(any, write.cond), 1).net();
        }
        any
    }
}

impl Default for Design {
    fn default() -> Self {
        Design::new()
    }
}

/// Chainable dispatch created by [`Design::switch`]. Each case runs its body
/// under `subject == pattern`; cases are tested independently, so multiple
/// matching cases all record their writes.
pub struct Switch<'a> {
    design: &'a Design,
    subject: Value,
}

impl Switch<'_> {
    pub fn case(self, pattern: u64, body: impl FnOnce()) -> Self {
        let design = self.design;
        let matches = design.eq(self.subject, design.lit(pattern, self.subject.width()));
        design.when(matches, body);
        self
    }
}

#[cfg(test)]
mod test {
    use crate::{Cell, Design};

    #[test]
    #[should_panic(expected = "add: operand widths differ (8 vs 4)")]
    fn test_width_mismatch() {
        let design = Design::new();
        let lhs = design.lit(1, 8);
        let rhs = design.lit(1, 4);
        design.add(lhs, rhs);
    }

    #[test]
    #[should_panic(expected = "mux: empty alternative list")]
    fn test_empty_mux() {
        let design = Design::new();
        let sel = design.lit(0, 1);
        design.mux(sel, &[]);
    }

    #[test]
    #[should_panic(expected = "bit: index 9 out of range for width 8 (valid range 0..8)")]
    fn test_bit_out_of_range() {
        let design = Design::new();
        let value = design.lit(0, 8);
        design.bit(value, 9);
    }

    #[test]
    #[should_panic(expected = "slice: bit range 2..9 out of range for width 8")]
    fn test_slice_out_of_range() {
        let design = Design::new();
        let value = design.lit(0, 8);
        design.slice(value, 2..9);
    }

    #[test]
    #[should_panic(expected = "from_bits: bit list length 3 does not match width 4")]
    fn test_from_bits_mismatch() {
        let design = Design::new();
        let bits: Vec<_> = (0..3).map(|_| design.lit(0, 1)).collect();
        design.from_bits(4, &bits);
    }

    #[test]
    #[should_panic(expected = "assign: value width 4 does not match target width 8")]
    fn test_assign_mismatch() {
        let design = Design::new();
        let reg = design.reg(8, 0);
        let value = design.lit(0, 4);
        design.assign(reg, value);
    }

    #[test]
    fn test_widths() {
        let design = Design::new();
        let a = design.lit(0, 3);
        let b = design.lit(0, 5);
        assert_eq!(design.concat(a, b).width(), 8);
        assert_eq!(design.mul_full(a, b, false).width(), 8);
        assert_eq!(design.slice(b, 1..4).width(), 3);
        assert_eq!(design.zext(a, 7).width(), 7);
        assert_eq!(design.sext(a, 7).width(), 7);
        assert_eq!(design.repeat(a, 3).width(), 9);
        assert_eq!(design.eq(a, a).width(), 1);
    }

    #[test]
    fn test_condition_nesting() {
        let design = Design::new();
        let a = design.input("a", 1);
        let b = design.input("b", 1);
        let reg = design.reg(4, 0);
        design.when(a, || {
            design.when(b, || {
                design.assign(reg, design.lit(7, 4));
            });
        });
        let writes = design.writes.borrow();
        assert_eq!(writes.len(), 1);
        // the innermost condition is the conjunction of both guards
        match &design.cells.borrow()[writes[0].cond.index()] {
            Cell::And(lhs, rhs) => {
                assert_eq!(*lhs, a.net());
                assert_eq!(*rhs, b.net());
            }
            cell => panic!("expected and cell, got {}", cell.name()),
        }
        // the enclosing condition is restored on exit
        assert_eq!(design.current_condition().net(), design.bit_net(true));
    }

    #[test]
    fn test_switch_overlap() {
        let design = Design::new();
        let subject = design.input("s", 2);
        let reg = design.reg(4, 0);
        design
            .switch(subject)
            .case(1, || design.assign(reg, design.lit(10, 4)))
            .case(1, || design.assign(reg, design.lit(11, 4)));
        // overlapping cases both record their writes
        assert_eq!(design.writes.borrow().len(), 2);
    }

    #[test]
    fn test_pulse_write_is_unconditional() {
        let design = Design::new();
        let cond = design.input("c", 1);
        design.when(cond, || {
            let pulse = design.pulse(4, 0);
            design.assign(pulse, design.lit(9, 4));
        });
        let writes = design.writes.borrow();
        // internal register copy of the wire, then the guarded user write
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].cond, design.bit_net(true));
        assert_eq!(writes[1].cond, cond.net());
    }

    #[test]
    fn test_ids_are_monotonic() {
        use super::Target;
        let design = Design::new();
        let a = design.reg(1, 0);
        let b = design.wire(1, 0);
        let c = design.ram(2, 4, None);
        assert!(a.id() < b.id());
        assert!(b.id() < c.id);
    }
}
