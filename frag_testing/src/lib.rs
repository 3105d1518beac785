//! Utilities for exercising a `sixlowpan-frag` stack in tests.
//!
//! The recording collaborators capture frames and datagrams in memory. The
//! builders produce fragments either through the crate's own fragmenter or
//! independently of it, and the logging and metrics helpers capture what the stack
//! reports.
//!
//! ```rust
//! use frag_testing::{datagram, netif, stack_with};
//! use sixlowpan_frag::FragConfig;
//!
//! let mut stack = stack_with(FragConfig::default());
//! stack.send_datagram(netif(), &datagram(300), None).expect("accepted");
//! stack.run_pending();
//! assert_eq!(stack.link().frames.len(), 4);
//! ```

pub mod collaborators;
pub mod datagrams;
pub mod logging;
pub mod metrics;

pub use collaborators::{CollectingUpstream, Delivered, RecordingLink, SentFrame};
pub use datagrams::{
    DST_ADDR,
    SRC_ADDR,
    TEST_FRAME_SIZE,
    TEST_IFACE,
    TestStack,
    datagram,
    fragment_frames,
    fragmented,
    netif,
    stack_with,
    stack_with_frame_size,
    test_interface,
    test_stack,
};
pub use logging::{LoggerHandle, logger};
pub use metrics::{MetricsSnapshot, debugging_recorder_setup};
