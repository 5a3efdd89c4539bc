//! Problem and solution exchange through one shared-memory segment.
//!
//! Segment layout:
//!
//! ```text
//! [ encoded IlpData ][ sealed IlpSolutionData, sized for the worst case ]
//!                    ^ result offset
//! ```
//!
//! The parent knows the result offset from serializing; the child recomputes
//! it by parsing the problem. The parent seeds the result region with an empty
//! solution, the child overwrites it any number of times, and the parent reads
//! it once after the child has exited.

use crate::codec::{self, encoded_len, sealed_len, CodecError};
use crate::config::IsolationConfig;
use crate::error::{SolverError, SolverResult};
use crate::problem::{IlpData, IlpDataView};
use crate::shm::{SharedMemory, ShmError};
use crate::solution::IlpSolutionData;
use tracing::{debug, warn};

/// Caller side of the channel. Owns the segment.
#[derive(Debug)]
pub struct CommunicationParent {
    base_name: String,
    trials: u32,
    segment: Option<SharedMemory>,
    result_offset: usize,
}

impl CommunicationParent {
    pub fn new(config: &IsolationConfig) -> Self {
        Self::with_base_name(config.shm_base_name.clone(), config.shm_name_trials)
    }

    pub fn with_base_name(base_name: impl Into<String>, trials: u32) -> Self {
        Self {
            base_name: base_name.into(),
            trials,
            segment: None,
            result_offset: 0,
        }
    }

    /// Create a segment, write `data` and an empty solution into it.
    ///
    /// Returns the segment name to pass to the worker.
    pub fn write_problem(&mut self, data: &IlpData) -> SolverResult<String> {
        let problem_len = encoded_len(data)?;
        let worst_case = IlpSolutionData::worst_case(data.num_cols(), data.num_rows());
        let result_len = sealed_len(encoded_len(&worst_case)?);

        // Drop a previous segment first so its name can be reused.
        self.segment = None;
        let mut segment = self.create_segment(problem_len + result_len)?;

        let (problem, result) = segment.as_mut_slice().split_at_mut(problem_len);
        codec::encode_into(data, problem)?;
        codec::write_sealed(result, &IlpSolutionData::new(data.objective_sense))?;

        let name = segment.name().to_string();
        debug!(
            "Wrote problem ({} x {}) to {}: {} problem bytes, {} result bytes",
            data.num_rows(),
            data.num_cols(),
            name,
            problem_len,
            result_len
        );
        self.result_offset = problem_len;
        self.segment = Some(segment);
        Ok(name)
    }

    fn create_segment(&self, size: usize) -> SolverResult<SharedMemory> {
        for trial in 1..=self.trials {
            let name = format!("{}{}", self.base_name, trial);
            match SharedMemory::create_only(&name, size) {
                Ok(segment) => return Ok(segment),
                Err(ShmError::AlreadyExists(_)) => {
                    debug!("Shared memory name {} in use, trying next", name);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(SolverError::Transport(format!(
            "No free shared memory name {}1..{}{}",
            self.base_name, self.base_name, self.trials
        )))
    }

    /// Read the solution the worker left in the result region.
    ///
    /// `Ok(None)` means the record is torn: the worker died while writing.
    pub fn read_solution(&self) -> SolverResult<Option<IlpSolutionData>> {
        let segment = self
            .segment
            .as_ref()
            .ok_or_else(|| SolverError::Transport("No problem written".to_string()))?;

        match codec::read_sealed(&segment.as_slice()[self.result_offset..]) {
            Ok(solution) => Ok(Some(solution)),
            Err(CodecError::TornRecord) => {
                warn!("Result record in {} is torn, discarding it", segment.name());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Byte offset of the result region within the segment.
    pub fn result_offset(&self) -> usize {
        self.result_offset
    }

    /// Name of the current segment, if a problem was written.
    pub fn name(&self) -> Option<&str> {
        self.segment.as_ref().map(SharedMemory::name)
    }
}

/// Worker side of the channel.
#[derive(Debug)]
pub struct CommunicationChild {
    segment: SharedMemory,
}

impl CommunicationChild {
    pub fn open(name: &str) -> SolverResult<Self> {
        Ok(Self {
            segment: SharedMemory::open_only(name)?,
        })
    }

    /// Parse the problem in place and hand out the writable result region.
    ///
    /// The view borrows the problem bytes; the sink borrows the result bytes.
    pub fn read_problem(&mut self) -> SolverResult<(IlpDataView<'_>, SolutionSink<'_>)> {
        let (_, offset) = codec::decode_view::<IlpDataView<'_>>(self.segment.as_slice())?;

        let (problem, result) = self.segment.as_mut_slice().split_at_mut(offset);
        let problem: &[u8] = problem;
        let (view, _) = codec::decode_view::<IlpDataView<'_>>(problem)?;
        Ok((view, SolutionSink { region: result, writes: 0 }))
    }
}

/// Writable result region of a segment.
#[derive(Debug)]
pub struct SolutionSink<'a> {
    region: &'a mut [u8],
    writes: usize,
}

impl<'a> SolutionSink<'a> {
    /// A sink over any buffer, for in-process use.
    pub fn new(region: &'a mut [u8]) -> Self {
        Self { region, writes: 0 }
    }

    /// Overwrite the result with `solution`.
    pub fn write(&mut self, solution: &IlpSolutionData) -> SolverResult<()> {
        codec::write_sealed(self.region, solution)?;
        self.writes += 1;
        Ok(())
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn capacity(&self) -> usize {
        self.region.len()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::problem::{ObjectiveSense, VariableType};
    use crate::solution::SolutionStatus;

    fn base(tag: &str) -> String {
        format!("IlpChanTest{}{}_", tag, std::process::id())
    }

    fn problem() -> IlpData {
        let mut data = IlpData::new();
        data.add_variable(VariableType::Continuous, 1.0, 0.0, 1.0, &[], &[]).unwrap();
        data.add_variable(VariableType::Integer, 2.0, 0.0, 3.0, &[], &[]).unwrap();
        data.add_constraint(&[0, 1], &[1.0, 1.0], 0.0, 2.0).unwrap();
        data.objective_sense = ObjectiveSense::Maximize;
        data
    }

    #[test]
    fn test_parent_child_exchange() {
        let data = problem();
        let mut parent = CommunicationParent::with_base_name(base("xchg"), 5);
        let name = parent.write_problem(&data).unwrap();
        assert_eq!(parent.name(), Some(name.as_str()));
        assert_eq!(parent.result_offset(), encoded_len(&data).unwrap());

        // Seeded with an empty solution
        let seeded = parent.read_solution().unwrap().unwrap();
        assert_eq!(seeded, IlpSolutionData::new(ObjectiveSense::Maximize));

        let mut child = CommunicationChild::open(&name).unwrap();
        let (view, mut sink) = child.read_problem().unwrap();
        assert_eq!(view.to_owned(), data);

        let solution = IlpSolutionData {
            status: SolutionStatus::ProvenOptimal,
            objective: 7.0,
            solution: vec![1.0, 3.0],
            dual: vec![0.5],
            cpu_time_sec: 0.01,
            peak_memory: 4096,
        };
        sink.write(&IlpSolutionData::new(ObjectiveSense::Maximize)).unwrap();
        sink.write(&solution).unwrap();
        assert_eq!(sink.writes(), 2);

        assert_eq!(parent.read_solution().unwrap(), Some(solution));
    }

    #[test]
    fn test_name_collision_retries_next_trial() {
        let base = base("retry");
        let _taken = SharedMemory::create_only(&format!("{}1", base), 8).unwrap();

        let mut parent = CommunicationParent::with_base_name(base.clone(), 3);
        let name = parent.write_problem(&problem()).unwrap();
        assert_eq!(name, format!("{}2", base));
    }

    #[test]
    fn test_name_trials_exhausted() {
        let base = base("full");
        let _a = SharedMemory::create_only(&format!("{}1", base), 8).unwrap();
        let _b = SharedMemory::create_only(&format!("{}2", base), 8).unwrap();

        let mut parent = CommunicationParent::with_base_name(base, 2);
        assert!(matches!(
            parent.write_problem(&problem()),
            Err(SolverError::Transport(_))
        ));
    }

    #[test]
    fn test_open_missing_segment() {
        assert!(matches!(
            CommunicationChild::open(&base("missing")),
            Err(SolverError::Transport(_))
        ));
    }

    #[test]
    fn test_torn_result_reads_as_none() {
        let mut parent = CommunicationParent::with_base_name(base("torn"), 5);
        let name = parent.write_problem(&problem()).unwrap();

        let mut raw = SharedMemory::open_only(&name).unwrap();
        let offset = parent.result_offset();
        // Corrupt the checksum
        raw.as_mut_slice()[offset + 8] ^= 0x01;

        assert_eq!(parent.read_solution().unwrap(), None);
    }

    #[test]
    fn test_read_before_write() {
        let parent = CommunicationParent::with_base_name(base("early"), 1);
        assert!(parent.read_solution().is_err());
    }
}
