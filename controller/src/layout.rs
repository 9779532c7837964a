use control_model::{Control, State};

use crate::MpcError;

/// One contiguous block of the decision vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Block {
    X,
    Y,
    Psi,
    V,
    Cte,
    Epsi,
    Steering,
    Throttle,
}

impl Block {
    /// Every block in decision vector order.
    pub const ALL: [Block; 8] = [
        Block::X,
        Block::Y,
        Block::Psi,
        Block::V,
        Block::Cte,
        Block::Epsi,
        Block::Steering,
        Block::Throttle,
    ];

    /// The state blocks, in the same order as the constraint rows.
    pub const STATES: [Block; 6] = [
        Block::X,
        Block::Y,
        Block::Psi,
        Block::V,
        Block::Cte,
        Block::Epsi,
    ];

    pub fn is_state(self) -> bool {
        match self {
            Block::Steering | Block::Throttle => false,
            _ => true,
        }
    }
}

/// Offset table of the flat decision vector for a horizon of `N` steps.
///
/// Six state blocks of length N are followed by two actuator blocks of
/// length N - 1. Constraint rows use the same offsets as the state blocks,
/// so row `start(b) + t` is the residual of state `b` at step `t`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    N: usize,
}

impl Layout {
    pub fn new(N: usize) -> Result<Layout, MpcError> {
        if N < 2 {
            return Err(MpcError::HorizonTooShort(N));
        }
        Ok(Layout { N })
    }

    pub fn horizon(&self) -> usize {
        self.N
    }

    pub fn len(&self, block: Block) -> usize {
        if block.is_state() {
            self.N
        } else {
            self.N - 1
        }
    }

    pub fn start(&self, block: Block) -> usize {
        let N = self.N;
        match block {
            Block::X => 0,
            Block::Y => N,
            Block::Psi => 2 * N,
            Block::V => 3 * N,
            Block::Cte => 4 * N,
            Block::Epsi => 5 * N,
            Block::Steering => 6 * N,
            Block::Throttle => 6 * N + (N - 1),
        }
    }

    pub fn range(&self, block: Block) -> std::ops::Range<usize> {
        let start = self.start(block);
        start..start + self.len(block)
    }

    pub fn num_vars(&self) -> usize {
        self.N * 6 + (self.N - 1) * 2
    }

    pub fn num_constraints(&self) -> usize {
        self.N * 6
    }

    /// Index of state `block` at step `t`, valid for both the decision vector
    /// and the constraint vector.
    pub fn index(&self, block: Block, t: usize) -> usize {
        debug_assert!(t < self.len(block));
        self.start(block) + t
    }

    pub fn view<'a, T>(&self, vars: &'a [T]) -> Blocks<'a, T> {
        debug_assert_eq!(vars.len(), self.num_vars());
        Blocks {
            layout: *self,
            vars,
        }
    }

    /// Writes a state into step `t` of the state blocks of `out`, which may be
    /// either a decision vector or a constraint vector.
    pub fn write_state<T: Copy>(&self, out: &mut [T], t: usize, state: &State<T>) {
        let values = [
            state.x, state.y, state.psi, state.v, state.cte, state.epsi,
        ];
        for (&block, &value) in Block::STATES.iter().zip(values.iter()) {
            out[self.index(block, t)] = value;
        }
    }
}

/// Typed read access to a flat decision vector.
#[derive(Clone, Copy)]
pub struct Blocks<'a, T> {
    layout: Layout,
    vars: &'a [T],
}

impl<'a, T: Copy> Blocks<'a, T> {
    pub fn block(&self, block: Block) -> &'a [T] {
        &self.vars[self.layout.range(block)]
    }

    pub fn x(&self) -> &'a [T] {
        self.block(Block::X)
    }

    pub fn y(&self) -> &'a [T] {
        self.block(Block::Y)
    }

    pub fn psi(&self) -> &'a [T] {
        self.block(Block::Psi)
    }

    pub fn v(&self) -> &'a [T] {
        self.block(Block::V)
    }

    pub fn cte(&self) -> &'a [T] {
        self.block(Block::Cte)
    }

    pub fn epsi(&self) -> &'a [T] {
        self.block(Block::Epsi)
    }

    pub fn steering(&self) -> &'a [T] {
        self.block(Block::Steering)
    }

    pub fn throttle(&self) -> &'a [T] {
        self.block(Block::Throttle)
    }

    pub fn state(&self, t: usize) -> State<T> {
        State::new(
            self.x()[t],
            self.y()[t],
            self.psi()[t],
            self.v()[t],
            self.cte()[t],
            self.epsi()[t],
        )
    }

    pub fn control(&self, t: usize) -> Control<T> {
        Control::new(self.steering()[t], self.throttle()[t])
    }
}
