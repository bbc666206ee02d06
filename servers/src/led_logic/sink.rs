/// Fire-and-forget channel output. Implementations must not block the
/// arbiter for unbounded time; any hardware I/O timeout lives behind this
/// trait, not in front of it.
pub trait OutputSink: Send {
    /// Light `channel` with `color`, an opaque display value taken from the
    /// alert definition.
    fn set_channel(&mut self, channel: usize, color: &str);

    /// Turn `channel` off.
    fn clear_channel(&mut self, channel: usize);
}
