use crate::commands::{open_migrated, prepare, CommandResult, StepError};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("migrate") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        pool.close().await;
        Ok::<String, StepError>("applied pending migrations".to_string())
    });

    CommandResult::from_step("migrate", result)
}
