use mosprims_peer::{HotStandbyController, MessageIdSequence};

use crate::cmd::{parse_duration, MachineInfoArgs};
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_machine_info, OutputFormat};

pub async fn run(args: MachineInfoArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.device.load()?;
    let timeout = parse_duration(&args.timeout)?;

    let controller = HotStandbyController::new(&config, MessageIdSequence::new());
    controller.connect();

    let request = async {
        // The reply travels on whichever connection becomes active first.
        let _ = controller.primary().wait_connected(timeout).await;
        controller.evaluate().await;
        controller
            .current()
            .request_machine_info(config.strictness())
            .await
    };
    let result = tokio::time::timeout(timeout, request).await;
    controller.dispose().await;

    let parsed = match result {
        Ok(Ok(parsed)) => parsed,
        Ok(Err(err)) => return Err(peer_error("machine info request failed", err)),
        Err(_) => {
            return Err(CliError::new(
                TIMEOUT,
                format!("no machine info reply within {timeout:?}"),
            ))
        }
    };
    print_machine_info(&parsed.value, &parsed.defects, format);
    Ok(SUCCESS)
}
