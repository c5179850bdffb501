//! Training events and the binary event-file codec.
//!
//! An [`Event`] is one training example: a batch of named candidate digraphs
//! decoded from a single event file, plus the index of the designated winner
//! whose score the trainer tries to push to the top.
//!
//! # Event file layout
//!
//! Little-endian throughout:
//!
//! ```text
//! u32 matrices_count | u32 rows | u32 cols | u32 name_size
//! repeated matrices_count times:
//!     u8  name[name_size]      NUL-padded
//!     u16 inputs[rows * cols]  row-major
//! ```
//!
//! The file size must match the header exactly; a decoder either returns a
//! fully populated event or an error, never partial state.

use std::{
    fs::File,
    io::{self, BufReader, Read, Write},
    path::Path,
};

use crate::{Digraph, Input, Value, Weight};

const HEADER_LEN: u64 = 16;

/// Why an event file could not be decoded.
#[derive(Debug, derive_more::Display, derive_more::Error, derive_more::From)]
pub enum EventLoadError {
    /// The file could not be opened or read.
    #[display("reading event data: {_0}")]
    Io(io::Error),

    /// The file size disagrees with what the header implies.
    #[display("event file is {actual} bytes but its header implies {expected} bytes")]
    #[from(skip)]
    FileSize { expected: u64, actual: u64 },

    /// A header field violates its minimum constraint.
    #[display("event header field '{field}' has out-of-range value {value}")]
    #[from(skip)]
    BadHeader { field: &'static str, value: u32 },

    /// No candidate matches the designated winner name.
    #[display("winner '{name}' does not name any candidate")]
    #[from(skip)]
    WinnerMissing {
        #[error(not(source))]
        name: String,
    },

    /// More than one candidate matches the designated winner name.
    #[display("winner '{name}' names more than one candidate")]
    #[from(skip)]
    WinnerAmbiguous {
        #[error(not(source))]
        name: String,
    },
}

/// One named candidate and its score pipeline.
#[derive(Debug, Clone)]
pub struct Candidate {
    name: String,
    digraph: Digraph,
}

impl Candidate {
    #[must_use]
    pub fn new(name: impl Into<String>, digraph: Digraph) -> Self {
        Self {
            name: name.into(),
            digraph,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn digraph(&self) -> &Digraph {
        &self.digraph
    }

    /// The candidate's score under the most recently evaluated weights.
    #[must_use]
    pub fn sink(&self) -> Value {
        self.digraph.sink()
    }
}

/// One training example: candidates plus the designated winner.
#[derive(Debug, Clone)]
pub struct Event {
    name: String,
    candidates: Vec<Candidate>,
    winner: usize,
}

impl Event {
    /// Assembles an event from already-built candidates.
    ///
    /// # Panics
    ///
    /// Panics if `candidates` is empty, `winner` is out of range, or the
    /// candidates disagree on their required weight count.
    #[must_use]
    pub fn new(name: impl Into<String>, candidates: Vec<Candidate>, winner: usize) -> Self {
        assert!(!candidates.is_empty(), "an event needs at least one candidate");
        assert!(winner < candidates.len(), "winner index out of range");
        let weights_count = candidates[0].digraph.required_weights_count();
        assert!(
            candidates
                .iter()
                .all(|c| c.digraph.required_weights_count() == weights_count),
            "candidates disagree on required weight count"
        );
        Self {
            name: name.into(),
            candidates,
            winner,
        }
    }

    /// Opens `path` and decodes it, designating the candidate named
    /// `winner_name` as the winner. The event is named after the file.
    pub fn from_file(path: &Path, winner_name: &str) -> Result<Self, EventLoadError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        Self::read_from(&mut reader, len, path.display().to_string(), winner_name)
    }

    /// Decodes an event from a stream of exactly `stream_len` bytes.
    pub fn read_from<R: Read>(
        reader: &mut R,
        stream_len: u64,
        name: impl Into<String>,
        winner_name: &str,
    ) -> Result<Self, EventLoadError> {
        if stream_len < HEADER_LEN {
            return Err(EventLoadError::FileSize {
                expected: HEADER_LEN,
                actual: stream_len,
            });
        }

        let matrices_count = read_u32(reader)?;
        let rows = read_u32(reader)?;
        let cols = read_u32(reader)?;
        let name_size = read_u32(reader)?;

        if matrices_count < 1 {
            return Err(EventLoadError::BadHeader {
                field: "matrices_count",
                value: matrices_count,
            });
        }
        if rows < 2 {
            return Err(EventLoadError::BadHeader {
                field: "rows",
                value: rows,
            });
        }
        if cols < 2 {
            return Err(EventLoadError::BadHeader {
                field: "cols",
                value: cols,
            });
        }
        if name_size < 1 {
            return Err(EventLoadError::BadHeader {
                field: "name_size",
                value: name_size,
            });
        }

        let cell_count = u64::from(rows) * u64::from(cols);
        let expected =
            HEADER_LEN + u64::from(matrices_count) * (u64::from(name_size) + cell_count * 2);
        if stream_len != expected {
            return Err(EventLoadError::FileSize {
                expected,
                actual: stream_len,
            });
        }

        let mut candidates = Vec::with_capacity(matrices_count as usize);
        let mut winner = None;
        let mut name_buf = vec![0_u8; name_size as usize];
        let mut cell_buf = vec![0_u8; cell_count as usize * 2];
        for index in 0..matrices_count as usize {
            reader.read_exact(&mut name_buf)?;
            let nul = name_buf.iter().position(|&b| b == 0).unwrap_or(name_buf.len());
            let candidate_name = String::from_utf8_lossy(&name_buf[..nul]).into_owned();

            reader.read_exact(&mut cell_buf)?;
            let inputs: Vec<Input> = cell_buf
                .chunks_exact(2)
                .map(|pair| Input::from_le_bytes([pair[0], pair[1]]))
                .collect();

            if candidate_name == winner_name {
                if winner.is_some() {
                    return Err(EventLoadError::WinnerAmbiguous {
                        name: winner_name.to_owned(),
                    });
                }
                winner = Some(index);
            }
            candidates.push(Candidate::new(
                candidate_name,
                Digraph::new(rows as usize, cols as usize, inputs),
            ));
        }

        let winner = winner.ok_or_else(|| EventLoadError::WinnerMissing {
            name: winner_name.to_owned(),
        })?;

        Ok(Self::new(name, candidates, winner))
    }

    /// Encodes the event in the on-disk layout, padding every candidate name
    /// with NULs to `name_size` bytes.
    ///
    /// Fails with [`io::ErrorKind::InvalidInput`] if a candidate name does not
    /// fit in `name_size`.
    pub fn write_to<W: Write>(&self, writer: &mut W, name_size: usize) -> io::Result<()> {
        let first = &self.candidates[0].digraph;
        writer.write_all(&(self.candidates.len() as u32).to_le_bytes())?;
        writer.write_all(&(first.rows() as u32).to_le_bytes())?;
        writer.write_all(&(first.cols() as u32).to_le_bytes())?;
        writer.write_all(&(name_size as u32).to_le_bytes())?;

        let mut name_buf = vec![0_u8; name_size];
        for candidate in &self.candidates {
            let bytes = candidate.name.as_bytes();
            if bytes.len() > name_size {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("candidate name '{}' exceeds {name_size} bytes", candidate.name),
                ));
            }
            name_buf.fill(0);
            name_buf[..bytes.len()].copy_from_slice(bytes);
            writer.write_all(&name_buf)?;
            for &cell in candidate.digraph.inputs() {
                writer.write_all(&cell.to_le_bytes())?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    #[must_use]
    pub fn candidates_count(&self) -> usize {
        self.candidates.len()
    }

    #[must_use]
    pub fn winner(&self) -> &Candidate {
        &self.candidates[self.winner]
    }

    /// Weight vector length every contained digraph expects.
    #[must_use]
    pub fn required_weights_count(&self) -> usize {
        self.candidates[0].digraph.required_weights_count()
    }

    /// Evaluates every candidate's digraph under `weights`.
    ///
    /// The candidates are independent; callers may instead fan the work out
    /// across threads, each evaluating a disjoint set of events.
    pub fn evaluate(&mut self, weights: &[Weight]) {
        for candidate in &mut self.candidates {
            candidate.digraph.evaluate(weights);
        }
    }

    /// 1-based rank of the winner: the number of candidates (the winner
    /// included) whose sink is greater than or equal to the winner's, so ties
    /// count against the winner. Best is 1, worst is `candidates_count()`.
    #[must_use]
    pub fn winner_rank(&self) -> u32 {
        let winner_sink = self.candidates[self.winner].sink();
        self.candidates
            .iter()
            .filter(|c| c.sink() >= winner_sink)
            .count() as u32
    }

    /// Candidates ordered by descending sink, for final reporting.
    #[must_use]
    pub fn ranked_candidates(&self) -> Vec<&Candidate> {
        let mut ranked: Vec<&Candidate> = self.candidates.iter().collect();
        ranked.sort_by(|a, b| b.sink().cmp(&a.sink()));
        ranked
    }
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0_u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn encode(matrices: u32, rows: u32, cols: u32, name_size: u32, body: &[(&str, &[u16])]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for field in [matrices, rows, cols, name_size] {
            bytes.extend_from_slice(&field.to_le_bytes());
        }
        for (name, inputs) in body {
            let mut name_buf = vec![0_u8; name_size as usize];
            name_buf[..name.len()].copy_from_slice(name.as_bytes());
            bytes.extend_from_slice(&name_buf);
            for cell in *inputs {
                bytes.extend_from_slice(&cell.to_le_bytes());
            }
        }
        bytes
    }

    fn decode(bytes: &[u8], winner: &str) -> Result<Event, EventLoadError> {
        Event::read_from(&mut Cursor::new(bytes), bytes.len() as u64, "test", winner)
    }

    #[test]
    fn test_decodes_names_dimensions_and_inputs() {
        let bytes = encode(
            2,
            2,
            2,
            8,
            &[("ACME", &[1, 2, 3, 4]), ("ZENITH", &[5, 6, 7, 8])],
        );
        let event = decode(&bytes, "ZENITH").unwrap();
        assert_eq!(event.candidates_count(), 2);
        assert_eq!(event.candidates()[0].name(), "ACME");
        assert_eq!(event.candidates()[1].name(), "ZENITH");
        assert_eq!(event.candidates()[0].digraph().inputs(), &[1, 2, 3, 4]);
        assert_eq!(event.winner().name(), "ZENITH");
        assert_eq!(event.required_weights_count(), 14);
    }

    #[test]
    fn test_rejects_single_row_header() {
        let bytes = encode(1, 1, 4, 4, &[("AAA", &[1, 2, 3, 4])]);
        assert!(matches!(
            decode(&bytes, "AAA"),
            Err(EventLoadError::BadHeader { field: "rows", value: 1 })
        ));
    }

    #[test]
    fn test_rejects_zero_matrices_header() {
        let bytes = encode(0, 2, 2, 4, &[]);
        assert!(matches!(
            decode(&bytes, "AAA"),
            Err(EventLoadError::BadHeader {
                field: "matrices_count",
                ..
            })
        ));
    }

    #[test]
    fn test_rejects_size_off_by_one() {
        let mut bytes = encode(1, 2, 2, 4, &[("AAA", &[1, 2, 3, 4])]);
        bytes.push(0);
        let expected = bytes.len() as u64 - 1;
        match decode(&bytes, "AAA") {
            Err(EventLoadError::FileSize { expected: e, actual }) => {
                assert_eq!(e, expected);
                assert_eq!(actual, expected + 1);
            }
            other => panic!("expected FileSize, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_missing_winner() {
        let bytes = encode(1, 2, 2, 4, &[("AAA", &[1, 2, 3, 4])]);
        assert!(matches!(
            decode(&bytes, "BBB"),
            Err(EventLoadError::WinnerMissing { .. })
        ));
    }

    #[test]
    fn test_rejects_duplicated_winner() {
        let bytes = encode(
            2,
            2,
            2,
            4,
            &[("AAA", &[1, 2, 3, 4]), ("AAA", &[5, 6, 7, 8])],
        );
        assert!(matches!(
            decode(&bytes, "AAA"),
            Err(EventLoadError::WinnerAmbiguous { .. })
        ));
    }

    #[test]
    fn test_round_trip_preserves_everything() {
        let bytes = encode(
            2,
            3,
            2,
            10,
            &[
                ("LONGNAME#1", &[1, 2, 3, 4, 5, 6]),
                ("B", &[60_000, 5, 4, 3, 2, 1]),
            ],
        );
        let event = decode(&bytes, "B").unwrap();

        let mut rewritten = Vec::new();
        event.write_to(&mut rewritten, 10).unwrap();
        assert_eq!(rewritten, bytes);

        let again = decode(&rewritten, "B").unwrap();
        assert_eq!(again.candidates_count(), event.candidates_count());
        for (a, b) in again.candidates().iter().zip(event.candidates()) {
            assert_eq!(a.name(), b.name());
            assert_eq!(a.digraph().inputs(), b.digraph().inputs());
            assert_eq!(a.digraph().rows(), b.digraph().rows());
        }
    }

    fn flat_event(a_cells: Input, b_cells: Input, winner: usize) -> Event {
        let a = Candidate::new("A", Digraph::new(2, 2, vec![a_cells; 4]));
        let b = Candidate::new("B", Digraph::new(2, 2, vec![b_cells; 4]));
        Event::new("flat", vec![a, b], winner)
    }

    #[test]
    fn test_rank_counts_dominant_candidates() {
        // Halving weights make each interior pair reproduce its ingress
        // value, so the sink equals the first-layer row sum.
        let mut event = flat_event(9, 1, 0);
        let weights = vec![16_384; event.required_weights_count()];
        event.evaluate(&weights);
        assert_eq!(event.candidates()[0].sink(), 294_912);
        assert_eq!(event.candidates()[1].sink(), 32_768);
        assert_eq!(event.winner_rank(), 1);

        let mut event = flat_event(9, 1, 1);
        event.evaluate(&weights);
        assert_eq!(event.winner_rank(), 2);
    }

    #[test]
    fn test_ties_count_against_the_winner() {
        let mut event = flat_event(7, 7, 1);
        let weights = vec![16_384; event.required_weights_count()];
        event.evaluate(&weights);
        assert_eq!(event.candidates()[0].sink(), event.candidates()[1].sink());
        assert_eq!(event.winner_rank(), 2);
    }

    #[test]
    #[should_panic(expected = "disagree on required weight count")]
    fn test_rejects_mixed_candidate_shapes() {
        let a = Candidate::new("A", Digraph::new(2, 2, vec![0; 4]));
        let b = Candidate::new("B", Digraph::new(3, 2, vec![0; 6]));
        let _ = Event::new("mixed", vec![a, b], 0);
    }

    #[test]
    fn test_ranked_candidates_descend_by_sink() {
        let mut event = flat_event(1, 9, 0);
        let weights = vec![16_384; event.required_weights_count()];
        event.evaluate(&weights);
        let ranked = event.ranked_candidates();
        assert_eq!(ranked[0].name(), "B");
        assert_eq!(ranked[1].name(), "A");
        assert!(ranked[0].sink() > ranked[1].sink());
    }
}
