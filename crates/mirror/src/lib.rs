pub mod mirror;
pub mod payload;
pub mod transport;

pub use mirror::{MirrorEvent, StatusMirror};
pub use payload::{render, ActivityPayload, PayloadButton, RenderOptions};
pub use transport::{
    presence_supported, NoopTransportFactory, StatusTransport, TransportEvent, TransportFactory,
};
