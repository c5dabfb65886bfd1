//! Pipeline module - Split-model inference across two stage threads.
//!
//! An encoder session turns each frame into an intermediate tensor; that
//! tensor is fanned out to N decoder sessions running concurrently. The two
//! stages are joined by a depth-1 handoff slot, which is the only
//! backpressure: a slow decoder blocks the encoder, a blocked encoder blocks
//! the producer, and frames are never dropped.
//!
//! ```rust,ignore
//! let executor = PipelineExecutor::builder(config)
//!     .encoder(encoder_session)
//!     .decoder("mask", mask_session)
//!     .decoder("depth", depth_session)
//!     .build()?;
//!
//! executor.start_monitoring()?;
//! let result = executor.run(frame)?;
//! let metrics = executor.stop_monitoring()?;
//! ```

pub mod executor;
pub mod fanout;
pub mod listener;
pub mod priority;

pub use executor::{PipelineBuilder, PipelineExecutor};
pub use fanout::DecoderPool;
pub use listener::{FrameResult, PipelineListener, StageTimestamps};
pub use priority::StagePriority;
