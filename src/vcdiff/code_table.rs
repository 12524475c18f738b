// RFC 3284 default instruction code table (Section 5.6).
//
// Each of the 256 opcodes expands to one or two half-instructions. A size
// of zero in the table means the real size follows in the instruction
// section as a varint. Only this table is supported; streams that declare
// a custom table are rejected before any window is decoded.

use std::sync::LazyLock;

use super::address_cache::{DEFAULT_NEAR, DEFAULT_SAME};

/// Shortest COPY the table has dedicated opcodes for.
pub const MIN_MATCH: u32 = 4;

/// Number of COPY address modes in the default table.
pub const COPY_MODES: u8 = (2 + DEFAULT_NEAR + DEFAULT_SAME) as u8;

/// Kind of one half of an opcode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InstKind {
    #[default]
    Noop,
    Add,
    Run,
    /// COPY with its address mode.
    Copy(u8),
}

impl InstKind {
    #[inline]
    pub fn is_copy(self) -> bool {
        matches!(self, InstKind::Copy(_))
    }
}

/// One half of an opcode: a kind and a table size (0 = explicit size).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HalfInst {
    pub kind: InstKind,
    pub size: u8,
}

impl HalfInst {
    const NOOP: HalfInst = HalfInst {
        kind: InstKind::Noop,
        size: 0,
    };

    const fn new(kind: InstKind, size: u8) -> Self {
        Self { kind, size }
    }
}

/// 256 opcodes, each a pair of half-instructions.
pub type CodeTable = [[HalfInst; 2]; 256];

fn build_default() -> CodeTable {
    let mut tbl = [[HalfInst::NOOP; 2]; 256];
    let mut op = 0usize;
    let mut push = |first: HalfInst, second: HalfInst| {
        tbl[op] = [first, second];
        op += 1;
    };

    push(HalfInst::new(InstKind::Run, 0), HalfInst::NOOP);
    for size in 0..=17u8 {
        push(HalfInst::new(InstKind::Add, size), HalfInst::NOOP);
    }
    for mode in 0..COPY_MODES {
        push(HalfInst::new(InstKind::Copy(mode), 0), HalfInst::NOOP);
        for size in 4..=18u8 {
            push(HalfInst::new(InstKind::Copy(mode), size), HalfInst::NOOP);
        }
    }
    // ADD(1..=4) + COPY(4..=6) in NEAR-or-lower modes, COPY(4) in SAME modes.
    for mode in 0..COPY_MODES {
        let copy_max = if mode < 2 + DEFAULT_NEAR as u8 { 6 } else { 4 };
        for add in 1..=4u8 {
            for copy in 4..=copy_max {
                push(
                    HalfInst::new(InstKind::Add, add),
                    HalfInst::new(InstKind::Copy(mode), copy),
                );
            }
        }
    }
    // COPY(4) + ADD(1).
    for mode in 0..COPY_MODES {
        push(
            HalfInst::new(InstKind::Copy(mode), 4),
            HalfInst::new(InstKind::Add, 1),
        );
    }

    debug_assert_eq!(op, 256);
    tbl
}

static DEFAULT_TABLE: LazyLock<CodeTable> = LazyLock::new(build_default);

/// The immutable default code table.
pub fn default_code_table() -> &'static CodeTable {
    &DEFAULT_TABLE
}

// ---------------------------------------------------------------------------
// Opcode selection (encoder side)
// ---------------------------------------------------------------------------

/// Single-instruction opcode for `kind` of `size`, plus the double opcode
/// that merges it with `prev` when the table has one.
///
/// When a double is returned the caller rewrites the previous
/// instruction's opcode and emits nothing new for this one.
pub fn choose_opcode(prev: Option<(InstKind, u32)>, kind: InstKind, size: u32) -> (u8, Option<u8>) {
    match kind {
        InstKind::Noop | InstKind::Run => (0, None),
        InstKind::Add => {
            if size == 0 || size > 17 {
                return (1, None);
            }
            let double = match prev {
                Some((InstKind::Copy(mode), 4)) if size == 1 => Some(247 + mode),
                _ => None,
            };
            (1 + size as u8, double)
        }
        InstKind::Copy(mode) => {
            let base = 19 + 16 * mode;
            if !(MIN_MATCH..=18).contains(&size) {
                return (base, None);
            }
            let single = base + (size as u8 - 3);
            let double = match prev {
                Some((InstKind::Add, add @ 1..=4)) => {
                    let add = add as u8;
                    if size <= 6 && mode <= 5 {
                        Some(163 + mode * 12 + 3 * (add - 1) + (size as u8 - 4))
                    } else if size == 4 && mode >= 6 {
                        Some(235 + (mode - 6) * 4 + (add - 1))
                    } else {
                        None
                    }
                }
                _ => None,
            };
            (single, double)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn t() -> &'static CodeTable {
        default_code_table()
    }

    #[test]
    fn fixed_landmarks() {
        assert_eq!(t()[0][0], HalfInst::new(InstKind::Run, 0));
        assert_eq!(t()[1][0], HalfInst::new(InstKind::Add, 0));
        assert_eq!(t()[18][0], HalfInst::new(InstKind::Add, 17));
        assert_eq!(t()[19][0], HalfInst::new(InstKind::Copy(0), 0));
        assert_eq!(t()[20][0], HalfInst::new(InstKind::Copy(0), 4));
        assert_eq!(t()[34][0], HalfInst::new(InstKind::Copy(0), 18));
        assert_eq!(t()[147][0], HalfInst::new(InstKind::Copy(8), 0));
        assert_eq!(t()[162][0], HalfInst::new(InstKind::Copy(8), 18));
    }

    #[test]
    fn double_ranges() {
        assert_eq!(
            t()[163],
            [
                HalfInst::new(InstKind::Add, 1),
                HalfInst::new(InstKind::Copy(0), 4)
            ]
        );
        assert_eq!(t()[175][1].kind, InstKind::Copy(1));
        assert_eq!(
            t()[235],
            [
                HalfInst::new(InstKind::Add, 1),
                HalfInst::new(InstKind::Copy(6), 4)
            ]
        );
        assert_eq!(
            t()[255],
            [
                HalfInst::new(InstKind::Copy(8), 4),
                HalfInst::new(InstKind::Add, 1)
            ]
        );
        for (i, e) in t().iter().enumerate() {
            if e[1].kind != InstKind::Noop {
                assert!(e[0].size != 0 && e[1].size != 0, "opcode {i}");
            }
        }
    }

    #[test]
    fn chosen_opcodes_decode_back() {
        let kinds = [InstKind::Add, InstKind::Run]
            .into_iter()
            .chain((0..COPY_MODES).map(InstKind::Copy));
        for kind in kinds {
            for size in 1..40u32 {
                if kind.is_copy() && size < MIN_MATCH {
                    continue;
                }
                let (op, _) = choose_opcode(None, kind, size);
                let half = t()[op as usize][0];
                assert_eq!(half.kind, kind);
                assert!(half.size == 0 || u32::from(half.size) == size);
                assert_eq!(t()[op as usize][1].kind, InstKind::Noop);
            }
        }
    }

    #[test]
    fn doubles_decode_back() {
        for mode in 0..COPY_MODES {
            for add in 1..=4u32 {
                for copy in 4..=6u32 {
                    let (_, d) = choose_opcode(Some((InstKind::Add, add)), InstKind::Copy(mode), copy);
                    if let Some(op) = d {
                        let [a, c] = t()[op as usize];
                        assert_eq!((a.kind, u32::from(a.size)), (InstKind::Add, add));
                        assert_eq!((c.kind, u32::from(c.size)), (InstKind::Copy(mode), copy));
                    }
                }
            }
            let (_, d) = choose_opcode(Some((InstKind::Copy(mode), 4)), InstKind::Add, 1);
            assert_eq!(d, Some(247 + mode));
        }
    }

    #[test]
    fn no_double_for_large_sizes() {
        assert_eq!(choose_opcode(Some((InstKind::Add, 5)), InstKind::Copy(0), 4).1, None);
        assert_eq!(choose_opcode(Some((InstKind::Add, 1)), InstKind::Copy(7), 5).1, None);
        assert_eq!(choose_opcode(None, InstKind::Add, 18), (1, None));
        assert_eq!(choose_opcode(None, InstKind::Copy(2), 19), (19 + 32, None));
    }
}
