use std::future::Future;
use std::pin::Pin;

use mosprims_model::{MachineInfo, MosString128, MosTime, MosType, Strictness, SupportedProfiles};
use mosprims_peer::{ListenerConfig, MosListener};
use tracing::info;

use crate::cmd::{parse_duration, ListenArgs};
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_listening, OutputFormat};

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let stop_after = args.duration.as_deref().map(parse_duration).transpose()?;
    let config = ListenerConfig {
        mos_id: args.mos_id.clone(),
        ncs_ids: args.ncs_ids.clone(),
        machine_info: Some(describe_self(&args.mos_id)?),
        ..ListenerConfig::default()
    };

    let addr = format!("{}:{}", args.bind, args.port);
    let listener = MosListener::bind(&addr, config)
        .await
        .map_err(|err| peer_error("bind failed", err))?;
    print_listening(listener.local_addr(), &args.mos_id, format);

    let shutdown: Pin<Box<dyn Future<Output = ()> + Send>> = match stop_after {
        Some(after) => Box::pin(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }),
        None => Box::pin(async {
            let _ = tokio::signal::ctrl_c().await;
        }),
    };
    listener
        .run(async move {
            shutdown.await;
            info!("stopping listener");
        })
        .await
        .map_err(|err| peer_error("listener failed", err))?;
    Ok(SUCCESS)
}

/// Machine info answered to `reqMachInfo`.
fn describe_self(mos_id: &str) -> CliResult<MachineInfo> {
    let text = |value: &str| {
        MosString128::create(value, Strictness::Strict)
            .map_err(|err| CliError::new(USAGE, format!("invalid value {value:?}: {err}")))
    };
    let mut profiles = SupportedProfiles {
        device_type: "MOS".to_string(),
        ..SupportedProfiles::default()
    };
    profiles.profiles[0] = true;

    Ok(MachineInfo {
        manufacturer: text("3leaps")?,
        model: text("mosprims")?,
        hw_rev: MosString128::default(),
        sw_rev: text(env!("CARGO_PKG_VERSION"))?,
        dom: MosString128::default(),
        sn: MosString128::default(),
        id: text(mos_id)?,
        time: MosTime::now(),
        op_time: None,
        mos_rev: text("2.8.5")?,
        supported_profiles: profiles,
    })
}
