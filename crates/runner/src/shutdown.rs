use tokio::sync::mpsc;

/// What the user asked for with Ctrl-C.
#[derive(Debug, Clone, Copy)]
pub enum ShutdownEvent {
    /// First interrupt: finish what can be finished, collate, report.
    Graceful,
    /// Second interrupt: get out now.
    Immediate,
}

/// Listens for Ctrl-C in the background. The first interrupt is graceful,
/// every further one is immediate.
pub fn spawn_ctrl_c_handler() -> mpsc::UnboundedReceiver<ShutdownEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut interrupts: u32 = 0;
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            interrupts += 1;
            let event = if interrupts == 1 {
                ShutdownEvent::Graceful
            } else {
                ShutdownEvent::Immediate
            };
            if tx.send(event).is_err() || interrupts > 1 {
                return;
            }
        }
    });
    rx
}
