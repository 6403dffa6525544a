//! Gateway lifecycle: bring-up, signal wait, drain-and-join shutdown.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rppal::gpio::{Gpio, InputPin, Trigger};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::GatewayConfig;
use crate::display::{DisplayHandle, DisplaySink};
use crate::events::{EventDispatcher, EventHandle};
use crate::hardware::{oled, rfm69::Rfm69, Ingress, Radio};
use crate::ingest::{DecodeWorker, FrameQueue};
use crate::store::Store;

/// Raw frames buffered between the interrupt thread and the decode worker.
const FRAME_QUEUE_DEPTH: usize = 64;

/// Everything the workers share, owned here rather than in module globals.
struct Pipeline {
    frames: Arc<FrameQueue>,
    display: DisplayHandle,
    events: EventHandle,
    worker: JoinHandle<()>,
    sink: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

/// Runs the gateway until SIGINT or SIGTERM.
pub async fn run(config: GatewayConfig) -> Result<()> {
    let store =
        Arc::new(Store::open(&config.db_url).context("database initialization failed")?);

    let pipeline = start_pipeline(&config, store)?;

    // A gateway that cannot hear its nodes has nothing to do, so radio
    // bring-up failure is fatal.
    let mut radio =
        Rfm69::open(&config).context("RFM69 radio failed to initialize with RuntimeError")?;
    let key = config.encryption_key_bytes()?;
    radio
        .set_encryption_key(&key)
        .context("failed to install encryption key")?;
    pipeline.display.post("Radio initialized OK");

    let radio: Arc<Mutex<Box<dyn Radio>>> = Arc::new(Mutex::new(Box::new(radio)));
    let ingress = Ingress::new(Arc::clone(&radio), Arc::clone(&pipeline.frames));
    let mut irq_pin = install_isr(&config, ingress)?;

    radio
        .lock()
        .expect("radio mutex poisoned")
        .listen()
        .context("radio failed to enter receive mode")?;
    info!("Listening for radio data");

    signal_wait().await;

    shut_down(pipeline, radio, &mut irq_pin).await;
    Ok(())
}

fn start_pipeline(config: &GatewayConfig, store: Arc<Store>) -> Result<Pipeline> {
    let frames = FrameQueue::new(FRAME_QUEUE_DEPTH);

    let panel = match oled::open_panel(config) {
        Ok(panel) => Some(panel),
        Err(err) => {
            // Non-fatal: the sink consumes panel-less so producers never
            // block on a missing display.
            error!(%err, "OLED display failed to initialize");
            None
        }
    };
    let (display, sink) = DisplaySink::new(panel);
    let (events, dispatcher) =
        EventDispatcher::new(config.event_actions.clone(), Arc::clone(&store))?;
    let worker = DecodeWorker::new(
        Arc::clone(&frames),
        store,
        display.clone(),
        events.clone(),
    );

    Ok(Pipeline {
        frames,
        display,
        events,
        worker: tokio::spawn(worker.run()),
        sink: tokio::spawn(sink.run()),
        dispatcher: tokio::spawn(dispatcher.run()),
    })
}

fn install_isr(config: &GatewayConfig, ingress: Ingress) -> Result<InputPin> {
    let gpio = Gpio::new().context("GPIO controller failed to open")?;
    let mut pin = gpio
        .get(config.radio_irq_pin)
        .context("radio interrupt pin unavailable")?
        .into_input_pulldown();
    pin.set_async_interrupt(Trigger::RisingEdge, None, move |_| {
        ingress.on_payload_ready()
    })
    .context("failed to register radio interrupt")?;
    info!(pin = config.radio_irq_pin, "radio interrupt armed");
    Ok(pin)
}

async fn signal_wait() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("SIGINT received, shutting down gracefully"),
                _ = sigterm.recv() => info!("SIGTERM received, shutting down gracefully"),
            }
        }
        Err(err) => {
            warn!(%err, "SIGTERM handler unavailable");
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("SIGINT received, shutting down gracefully");
            }
        }
    }
}

async fn shut_down(pipeline: Pipeline, radio: Arc<Mutex<Box<dyn Radio>>>, irq_pin: &mut InputPin) {
    // Disarm the interrupt before touching the radio; after this the ISR
    // and the supervisor can no longer race on the device handle.
    if let Err(err) = irq_pin.clear_async_interrupt() {
        warn!(%err, "failed to disarm radio interrupt");
    }
    if let Err(err) = radio.lock().expect("radio mutex poisoned").standby() {
        warn!(%err, "radio failed to leave receive mode");
    }

    let Pipeline {
        frames,
        display,
        events,
        worker,
        sink,
        dispatcher,
    } = pipeline;

    // Let the decode worker drain whatever the ISR already queued.
    frames.close();
    if worker.await.is_err() {
        error!("decode worker panicked");
    }
    if frames.dropped() > 0 {
        warn!(dropped = frames.dropped(), "frames lost to queue overflow");
    }

    // The worker held the other clone feeding the dispatcher.
    drop(events);
    if dispatcher.await.is_err() {
        error!("event dispatcher panicked");
    }

    display.post("");
    display.post("");
    display.post("");
    display.post("OLED shut down");
    drop(display);
    if sink.await.is_err() {
        error!("display sink panicked");
    }

    info!("Data recorder shutdown");
}
