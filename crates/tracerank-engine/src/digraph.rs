//! The fixed-point score pipeline.
//!
//! A [`Digraph`] maps one rectangular matrix of unsigned 16-bit inputs to a
//! single signed 64-bit score, under a borrowed weight vector. The pipeline is
//! a layered reduction: the input matrix feeds a first value layer of width
//! `2 * rows` (each row is consumed twice, through two independent weight
//! sets), and every following layer halves the previous one (rounding up)
//! until a single sink value remains.
//!
//! All arithmetic is integer-only. Inputs occupy 16 bits, weights 16 bits, so
//! a first-layer value fits comfortably in 64 bits; every interior combination
//! is rescaled by an arithmetic right shift to keep intermediates bounded.

use crate::{Input, Value, Weight};

/// Arithmetic right shift applied to every interior combination.
///
/// Rust's `>>` on a signed integer is sign-preserving: positive values
/// converge to 0, negative values to -1, which is exactly the rescaling the
/// pipeline relies on.
pub const SHIFT_COUNT: u32 = 15;

/// Widths of the value layers for a matrix of `rows` rows, first layer first,
/// ending with the sink layer of width 1.
fn layer_widths(rows: usize) -> impl Iterator<Item = usize> {
    let mut width = rows * 2;
    std::iter::from_fn(move || {
        if width == 0 {
            return None;
        }
        let current = width;
        width = if width == 1 { 0 } else { width.div_ceil(2) };
        Some(current)
    })
}

/// Total number of values held by the pipeline for a matrix of `rows` rows.
fn value_count(rows: usize) -> usize {
    layer_widths(rows).sum()
}

/// Number of weights a digraph over a `rows` by `cols` matrix consumes.
///
/// Every input cell is read twice, each read through its own weight, and
/// every value except the final sink carries one outgoing weight.
#[must_use]
pub fn required_weights_count(rows: usize, cols: usize) -> usize {
    rows * cols * 2 + value_count(rows) - 1
}

/// One item's score pipeline: an immutable input matrix plus the owned
/// intermediate value buffer its evaluation writes into.
#[derive(Debug, Clone)]
pub struct Digraph {
    rows: usize,
    cols: usize,
    inputs: Vec<Input>,
    values: Vec<Value>,
    required_weights: usize,
}

impl Digraph {
    /// Builds a pipeline over a row-major `rows` by `cols` input matrix.
    ///
    /// # Panics
    ///
    /// Panics if `rows < 2`, `cols < 2`, or `inputs.len() != rows * cols`.
    /// Callers loading untrusted data validate dimensions first (see
    /// [`Event::read_from`](crate::Event::read_from)).
    #[must_use]
    pub fn new(rows: usize, cols: usize, inputs: Vec<Input>) -> Self {
        assert!(rows >= 2, "a digraph needs at least 2 rows, got {rows}");
        assert!(cols >= 2, "a digraph needs at least 2 columns, got {cols}");
        assert_eq!(inputs.len(), rows * cols, "input buffer does not match dimensions");

        Self {
            rows,
            cols,
            inputs,
            values: vec![0; value_count(rows)],
            required_weights: required_weights_count(rows, cols),
        }
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// The row-major input matrix.
    #[must_use]
    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    /// Length of the weight vector [`evaluate`](Self::evaluate) expects.
    #[must_use]
    pub fn required_weights_count(&self) -> usize {
        self.required_weights
    }

    /// The final scalar produced by the most recent [`evaluate`](Self::evaluate).
    ///
    /// Zero until the first evaluation.
    #[must_use]
    pub fn sink(&self) -> Value {
        self.values[self.values.len() - 1]
    }

    /// Runs the pipeline: fills the first value layer from the inputs, then
    /// reduces layer by layer down to the sink.
    ///
    /// Reads only `self.inputs` and `weights`, writes only `self.values`, so
    /// concurrent evaluations of distinct digraphs under one shared weight
    /// slice are safe. Identical `(inputs, weights)` always produce an
    /// identical sink.
    ///
    /// # Panics
    ///
    /// Panics if `weights.len() != self.required_weights_count()`.
    pub fn evaluate(&mut self, weights: &[Weight]) {
        assert_eq!(weights.len(), self.required_weights, "weight vector length mismatch");

        let mut weight_index = 0;
        let mut egress_index = 0;

        // Each input row feeds two first-layer values through two separate
        // weight runs over the same cells.
        for row in self.inputs.chunks_exact(self.cols) {
            for _ in 0..2 {
                let mut acc: Value = 0;
                for &cell in row {
                    acc += Value::from(cell) * Value::from(weights[weight_index]);
                    weight_index += 1;
                }
                self.values[egress_index] = acc;
                egress_index += 1;
            }
        }

        // Reduce: two adjacent ingress values combine into one egress value
        // through two fresh weights; an odd trailing value forwards alone.
        // The layer whose last value sits at `egress_index - 1` before any
        // egress is written is the sink layer, which ends the reduction.
        let mut ingress_index = 0;
        loop {
            let last_ingress = egress_index - 1;
            if ingress_index == last_ingress {
                break;
            }
            while ingress_index < last_ingress {
                let combined = self.values[ingress_index] * Value::from(weights[weight_index])
                    + self.values[ingress_index + 1] * Value::from(weights[weight_index + 1]);
                self.values[egress_index] = combined >> SHIFT_COUNT;
                ingress_index += 2;
                weight_index += 2;
                egress_index += 1;
            }
            if ingress_index == last_ingress {
                self.values[egress_index] =
                    (self.values[ingress_index] * Value::from(weights[weight_index])) >> SHIFT_COUNT;
                ingress_index += 1;
                weight_index += 1;
                egress_index += 1;
            }
        }
    }
}
