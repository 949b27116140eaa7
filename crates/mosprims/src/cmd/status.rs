use mosprims_peer::{ActiveConnection, HotStandbyController, MessageIdSequence};
use tracing::debug;

use crate::cmd::{parse_duration, StatusArgs};
use crate::exit::{CliResult, FAILURE, SUCCESS};
use crate::output::{print_device_status, OutputFormat};

pub async fn run(args: StatusArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.device.load()?;
    let wait = parse_duration(&args.wait)?;

    let controller = HotStandbyController::new(&config, MessageIdSequence::new());
    controller.connect();

    let primary = controller.primary().wait_connected(wait);
    let secondary = async {
        match controller.secondary() {
            Some(secondary) => secondary.wait_connected(wait).await,
            None => Ok(()),
        }
    };
    let (primary, secondary) = tokio::join!(primary, secondary);
    if let Err(err) = primary.and(secondary) {
        debug!(error = %err, "not every connection came up");
    }
    controller.evaluate().await;

    let status = controller.status();
    print_device_status(&status, format);
    controller.dispose().await;

    Ok(if status.active == ActiveConnection::None {
        FAILURE
    } else {
        SUCCESS
    })
}
