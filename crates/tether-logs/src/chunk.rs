use thiserror::Error;

pub const DEFAULT_MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("log line exceeds max size: {size} > {max}")]
    OversizedLine { size: usize, max: usize },
    #[error("buffer exceeds max size without newline: {size} > {max}")]
    OversizedBuffer { size: usize, max: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkReport {
    pub lines: Vec<String>,
    pub errors: Vec<ChunkError>,
}

/// Splits tail chunks into complete lines, carrying partial lines across
/// chunk boundaries.
///
/// Once a partial line outgrows the limit it is dropped, and the rest of that
/// line is skipped up to its newline in later chunks.
#[derive(Debug, Clone)]
pub struct LineAssembler {
    max_line_bytes: usize,
    pending: Vec<u8>,
    discarding: bool,
}

impl Default for LineAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

impl LineAssembler {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            max_line_bytes: max_line_bytes.max(1),
            pending: Vec::new(),
            discarding: false,
        }
    }

    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) -> ChunkReport {
        let mut report = ChunkReport::default();
        let mut chunk = chunk;
        if self.discarding {
            match chunk.iter().position(|byte| *byte == b'\n') {
                Some(newline_idx) => {
                    self.discarding = false;
                    chunk = &chunk[newline_idx + 1..];
                }
                None => return report,
            }
        }
        if !chunk.is_empty() {
            self.pending.extend_from_slice(chunk);
        }

        while let Some(newline_idx) = self.pending.iter().position(|byte| *byte == b'\n') {
            let mut line = self.pending.drain(..=newline_idx).collect::<Vec<u8>>();
            line.pop();
            if line.ends_with(b"\r") {
                line.pop();
            }
            if line.is_empty() {
                continue;
            }
            self.emit(&line, &mut report);
        }

        if self.pending.len() > self.max_line_bytes {
            report.errors.push(ChunkError::OversizedBuffer {
                size: self.pending.len(),
                max: self.max_line_bytes,
            });
            self.pending.clear();
            self.discarding = true;
        }
        report
    }

    /// Flushes a trailing line that never got its newline.
    pub fn finish(&mut self) -> ChunkReport {
        let mut report = ChunkReport::default();
        let mut line = std::mem::take(&mut self.pending);
        if std::mem::take(&mut self.discarding) {
            return report;
        }
        if line.ends_with(b"\r") {
            line.pop();
        }
        if !line.is_empty() {
            self.emit(&line, &mut report);
        }
        report
    }

    fn emit(&self, line: &[u8], report: &mut ChunkReport) {
        if line.len() > self.max_line_bytes {
            report.errors.push(ChunkError::OversizedLine {
                size: line.len(),
                max: self.max_line_bytes,
            });
            return;
        }
        report.lines.push(String::from_utf8_lossy(line).into_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_lines_carry_across_chunks() {
        let mut assembler = LineAssembler::default();
        let first = assembler.push_chunk(b"alpha\r\nbra");
        assert_eq!(first.lines, vec!["alpha".to_string()]);
        assert!(assembler.has_partial());

        let second = assembler.push_chunk(b"vo\n\ncharlie");
        assert_eq!(second.lines, vec!["bravo".to_string()]);
        let tail = assembler.finish();
        assert_eq!(tail.lines, vec!["charlie".to_string()]);
        assert!(!assembler.has_partial());
    }

    #[test]
    fn oversized_input_is_dropped_and_reported() {
        let mut assembler = LineAssembler::new(8);
        let report = assembler.push_chunk(b"0123456789\nok\n");
        assert_eq!(report.lines, vec!["ok".to_string()]);
        assert_eq!(
            report.errors,
            vec![ChunkError::OversizedLine { size: 10, max: 8 }]
        );

        let report = assembler.push_chunk(b"runaway-partial");
        assert!(report.lines.is_empty());
        assert_eq!(
            report.errors,
            vec![ChunkError::OversizedBuffer { size: 15, max: 8 }]
        );
        assert!(!assembler.has_partial());
    }

    #[test]
    fn remainder_of_a_dropped_line_is_skipped() {
        let mut assembler = LineAssembler::new(8);
        let report = assembler.push_chunk(b"0123456789AB");
        assert_eq!(
            report.errors,
            vec![ChunkError::OversizedBuffer { size: 12, max: 8 }]
        );

        let report = assembler.push_chunk(b"CDEF");
        assert!(report.lines.is_empty());
        assert!(report.errors.is_empty());

        let report = assembler.push_chunk(b"GH\nok\n");
        assert_eq!(report.lines, vec!["ok".to_string()]);
        assert!(report.errors.is_empty());

        assembler.push_chunk(b"XXXXXXXXXXXX");
        assert!(assembler.finish().lines.is_empty());
        let report = assembler.push_chunk(b"fresh\n");
        assert_eq!(report.lines, vec!["fresh".to_string()]);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_rejected() {
        let mut assembler = LineAssembler::default();
        let report = assembler.push_chunk(b"caf\xe9\n");
        assert_eq!(report.lines, vec!["caf\u{fffd}".to_string()]);
    }
}
