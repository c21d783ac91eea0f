use geoduel_core::ClientMsg;

/// Outbound half of the relay seam. Publishing is fire-and-forget: a
/// failed or dropped frame costs nothing but latency, because the
/// document path is the fallback of record.
pub trait RelayLink {
    fn publish(&self, msg: ClientMsg);

    fn is_connected(&self) -> bool;
}

/// Relay that goes nowhere. Components behave correctly with it — the
/// opponent just sees state at document-propagation speed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRelay;

impl RelayLink for NullRelay {
    fn publish(&self, _msg: ClientMsg) {}

    fn is_connected(&self) -> bool {
        false
    }
}
