/// Hook for allocation failures hit by the background loader.
///
/// The loader abandons the affected thumbnail and keeps running; this
/// handler is where an application frees memory or tells the user.
pub trait OutOfMemoryHandler: Send + Sync {
    fn handle_out_of_memory(&self, context: &str);
}

/// Default handler: record the event and carry on.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOutOfMemory;

impl OutOfMemoryHandler for LogOutOfMemory {
    fn handle_out_of_memory(&self, context: &str) {
        tracing::error!(context, "out of memory while loading thumbnail");
    }
}
