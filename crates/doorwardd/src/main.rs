use anyhow::{Context, Result};
use doorward_core::{GatewayConfig, GalleryStore, RecognitionGateway};
use doorward_hw::gpio::{GpioBuzzer, GpioButton, GpioOutput, GpioPin};
use doorward_hw::sim::{self, LogDisplay, SimButton};
use doorward_hw::{Button, Camera, FrameSource, Hardware, Linphone};
use doorwardd::backend::{Backend, HttpBackend};
use doorwardd::call::{self, CallConfig, CallService};
use doorwardd::config::{Config, HardwareBackend};
use doorwardd::controller::{AccessController, ControllerConfig};
use doorwardd::door::{DoorCell, LockState};
use doorwardd::door_sync::{DoorSynchronizer, SyncBackoff};
use doorwardd::engine;
use doorwardd::gallery_sync;
use doorwardd::http::{self, AppState};
use doorwardd::notifier::NotificationPipeline;
use doorwardd::panel::Panel;
use doorwardd::queue::DropOldestQueue;
use doorwardd::remote::RemoteChannel;
use doorwardd::streaming::{StreamConfig, StreamPublisher};
use doorwardd::vision_client::RemoteVision;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn build_hardware(config: &Config) -> Result<(Hardware, Box<dyn Button>)> {
    match config.hardware {
        HardwareBackend::Sim => {
            tracing::info!("using simulated hardware");
            Ok((sim::simulated(), Box::new(SimButton)))
        }
        HardwareBackend::Gpio => {
            let root = config.gpio_root.as_path();
            let pins = &config.pins;
            let output = |pin: u32| {
                GpioPin::output(root, pin).with_context(|| format!("failed to export GPIO output {pin}"))
            };
            let hardware = Hardware {
                relay: Box::new(GpioOutput(output(pins.relay)?)),
                buzzer: Box::new(GpioBuzzer(output(pins.buzzer)?)),
                success: Box::new(GpioOutput(output(pins.success)?)),
                failure: Box::new(GpioOutput(output(pins.failure)?)),
                display: Box::new(LogDisplay),
            };
            let button = GpioPin::input(root, pins.button)
                .with_context(|| format!("failed to export GPIO input {}", pins.button))?;
            tracing::info!(root = %root.display(), "using sysfs GPIO hardware");
            Ok((hardware, Box::new(GpioButton(button))))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load().context("invalid configuration")?;
    tracing::info!(device_id = %config.device_id, name = %config.device_name, "doorwardd starting");

    let cancel = CancellationToken::new();
    let (hardware, button) = build_hardware(&config)?;
    let panel = Panel::new(hardware);
    panel.show("Device Powered", "Initializing...");

    let camera = Camera::open(
        &config.camera_device,
        config.camera_width,
        config.camera_height,
        config.camera_fps,
    )
    .with_context(|| format!("camera {} unavailable", config.camera_device))?;
    let source = FrameSource::spawn(camera, config.camera_fps, cancel.child_token())
        .context("failed to start capture thread")?;

    let backend: Arc<dyn Backend> = Arc::new(
        HttpBackend::new(&config.backend_url, &config.device_id, config.request_timeout())
            .context("failed to build backend client")?,
    );

    let gallery = Arc::new(GalleryStore::new());
    if let Err(e) = gallery_sync::refresh(backend.as_ref(), &gallery).await {
        tracing::warn!(error = %e, "initial gallery refresh failed; every face is unrecognized until the next refresh");
    }

    let vision = RemoteVision::new(config.vision_url.clone(), config.request_timeout());
    let gateway = RecognitionGateway::new(
        vision,
        Arc::clone(&gallery),
        GatewayConfig::with_threshold(config.similarity_threshold),
    );
    let engine = engine::spawn_engine(gateway).context("failed to start recognition engine")?;

    let door = DoorCell::new(LockState::Locked);
    let notifications = Arc::new(DropOldestQueue::new(config.notification_capacity));

    let controller = AccessController::new(
        ControllerConfig::from_config(&config),
        config.device_id.clone(),
        engine,
        door.clone(),
        panel.clone(),
        Arc::clone(&notifications),
    );
    let cycle = controller.cycle();

    let agent = Linphone::new(config.sip_target.clone(), config.soundcard);
    let calls: Arc<CallService<dyn Backend>> = Arc::new(
        CallService::new(
            CallConfig::from_config(&config),
            Arc::clone(&backend),
            Box::new(agent),
            panel.clone(),
            Arc::clone(&notifications),
            cancel.child_token(),
        )
        .with_frames(source.subscribe()),
    );

    let mut tasks = tokio::task::JoinSet::new();
    tasks.spawn(controller.run(source.subscribe(), cancel.child_token()));
    tasks.spawn(
        NotificationPipeline::new(
            Arc::clone(&backend),
            Arc::clone(&notifications),
            config.upload_timeout(),
            config.jpeg_quality,
        )
        .run(cancel.child_token()),
    );
    tasks.spawn(
        DoorSynchronizer::new(Arc::clone(&backend), door.clone(), SyncBackoff::from_config(&config))
            .with_panel(panel.clone())
            .run(cancel.child_token()),
    );
    tasks.spawn(call::poll_button(
        button,
        Arc::clone(&calls),
        config.controller_poll(),
        cancel.child_token(),
    ));

    let stream_health = if config.stream_enabled {
        let publisher = StreamPublisher::new(Arc::clone(&backend), StreamConfig::from_config(&config));
        let health = publisher.health();
        tasks.spawn(publisher.run(source.subscribe(), cancel.child_token()));
        Some(health)
    } else {
        tracing::info!("live view disabled");
        None
    };

    let state = AppState {
        device_id: config.device_id.clone(),
        remote: Arc::new(RemoteChannel::new(&config.door_secret, config.replay_window())),
        door: door.clone(),
        panel: panel.clone(),
        calls: Arc::clone(&calls),
        backend: Arc::clone(&backend),
        gallery: Arc::clone(&gallery),
        cycle,
        frames: source.subscribe(),
        stream_health,
        jpeg_quality: config.jpeg_quality,
    };
    let listen_addr = config.listen_addr.clone();
    let http_cancel = cancel.child_token();
    let http_task = tokio::spawn(async move { http::serve(&listen_addr, state, http_cancel).await });

    panel.show_ready(true);
    tracing::info!("doorwardd ready");

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for shutdown signal")?;
        }
        served = http_task => {
            // The HTTP surface only returns early on a bind or accept failure.
            match served {
                Ok(Ok(())) => tracing::warn!("http surface exited"),
                Ok(Err(e)) => tracing::error!(error = %e, "http surface failed"),
                Err(e) => tracing::error!(error = %e, "http task panicked"),
            }
        }
    }
    tracing::info!("doorwardd shutting down");

    cancel.cancel();
    calls.hangup();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "worker task failed");
        }
    }
    calls.shutdown_agent().await;
    tokio::task::spawn_blocking(move || source.join())
        .await
        .context("capture thread join failed")?;
    panel.with(|hw| hw.release());

    tracing::info!("doorwardd stopped");
    Ok(())
}
