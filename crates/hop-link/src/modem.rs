//! Modem interface and the versioned modem handle
//!
//! The modem turns frames into samples for a given subcarrier allocation and
//! back. Installing a new allocation builds a fresh generator/synchronizer
//! pair and publishes it; a burst clones the current [`Versioned`] stage when
//! it starts and keeps using it until it finishes, so an object in use is
//! only dropped once the last burst holding it releases its `Arc`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::allocation::SubcarrierAllocation;
use crate::frontend::Sample;

/// Link-quality metrics reported with every detected frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SignalStats {
    /// Error vector magnitude, dB
    pub evm_db: f32,
    /// Received signal strength, dB
    pub rssi_db: f32,
    /// Carrier frequency offset, fraction of subcarrier spacing
    pub cfo: f32,
}

/// One frame reported by the synchronizer
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DetectedFrame {
    pub header: Vec<u8>,
    pub header_valid: bool,
    pub payload: Vec<u8>,
    pub payload_valid: bool,
    pub stats: SignalStats,
}

impl DetectedFrame {
    pub fn is_valid(&self) -> bool {
        self.header_valid && self.payload_valid
    }
}

/// Receives frames from a synchronizer while it works through a burst
pub trait FrameSink {
    fn on_frame(&mut self, frame: DetectedFrame);
}

impl FrameSink for Vec<DetectedFrame> {
    fn on_frame(&mut self, frame: DetectedFrame) {
        self.push(frame);
    }
}

/// Transmit side of the modem
pub trait FrameGenerator: Send + Sync {
    /// Modulate one frame
    fn modulate(&self, header: &[u8], payload: &[u8]) -> Vec<Sample>;

    /// Noise burst for calibration
    fn noise(&self, sample_count: usize) -> Vec<Sample>;
}

/// Receive side of the modem
pub trait FrameSynchronizer: Send + Sync {
    /// Search `samples` for frames, reporting each one to `sink`
    fn demodulate(&self, samples: &[Sample], sink: &mut dyn FrameSink);
}

/// Builds modem stages for an allocation
pub trait ModemFactory: Send + Sync {
    fn generator(&self, allocation: &SubcarrierAllocation) -> Box<dyn FrameGenerator>;
    fn synchronizer(&self, allocation: &SubcarrierAllocation) -> Box<dyn FrameSynchronizer>;
}

/// A modem stage tagged with the allocation it was built for
pub struct Versioned<T> {
    pub version: u64,
    pub allocation: Arc<SubcarrierAllocation>,
    pub inner: T,
}

pub type GeneratorStage = Versioned<Box<dyn FrameGenerator>>;
pub type SynchronizerStage = Versioned<Box<dyn FrameSynchronizer>>;

/// Shared, versioned modem for one node
pub struct ModemHandle {
    factory: Arc<dyn ModemFactory>,
    generator: RwLock<Arc<GeneratorStage>>,
    synchronizer: RwLock<Arc<SynchronizerStage>>,
    version: AtomicU64,
}

impl ModemHandle {
    /// Build stages for the initial allocation (version 0)
    pub fn new(factory: Arc<dyn ModemFactory>, allocation: SubcarrierAllocation) -> Self {
        let allocation = Arc::new(allocation);
        let generator = Arc::new(Versioned {
            version: 0,
            allocation: allocation.clone(),
            inner: factory.generator(&allocation),
        });
        let synchronizer = Arc::new(Versioned {
            version: 0,
            inner: factory.synchronizer(&allocation),
            allocation,
        });
        Self {
            factory,
            generator: RwLock::new(generator),
            synchronizer: RwLock::new(synchronizer),
            version: AtomicU64::new(0),
        }
    }

    /// Publish a new allocation and return its version
    ///
    /// Stages are built before either lock is taken; each side is swapped
    /// under its own lock.
    pub fn install(&self, allocation: SubcarrierAllocation) -> u64 {
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        let allocation = Arc::new(allocation);
        let generator = Arc::new(Versioned {
            version,
            allocation: allocation.clone(),
            inner: self.factory.generator(&allocation),
        });
        let synchronizer = Arc::new(Versioned {
            version,
            allocation: allocation.clone(),
            inner: self.factory.synchronizer(&allocation),
        });

        *self
            .generator
            .write()
            .unwrap_or_else(PoisonError::into_inner) = generator;
        *self
            .synchronizer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = synchronizer;

        info!("Allocation v{} installed: {}", version, allocation);
        version
    }

    /// Current generator stage
    pub fn generator(&self) -> Arc<GeneratorStage> {
        self.generator
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current synchronizer stage
    pub fn synchronizer(&self) -> Arc<SynchronizerStage> {
        self.synchronizer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Allocation of the current generator stage
    pub fn allocation(&self) -> Arc<SubcarrierAllocation> {
        self.generator().allocation.clone()
    }

    /// Latest published version
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}
