use clap::{Parser, Subcommand};
use colored::Colorize;
use cosmos_testbed_lib::{
    check_image, cleanup_on_exit, configure_logging, export_certificate, CliError, ConnectionInfo,
};
use emulator::{CosmosDbEmulatorContainer, DEFAULT_CERTIFICATE_PATH, DEFAULT_IMAGE_NAME};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "cosmos-testbed",
    about = "Run the Azure Cosmos DB Linux emulator in Docker",
    version,
    long_about = "Starts the Azure Cosmos DB Linux emulator in a Docker container and prints how to reach it.\n\nExamples:\n  cosmos-testbed start                                   # Start the emulator, stop it on Ctrl+C\n  cosmos-testbed start --json                            # Print connection details as JSON\n  cosmos-testbed start --export-certificate emulator.cer # Save the emulator TLS certificate\n  cosmos-testbed check-image my.registry/cosmos:1.0      # Check an image can be used\n  cosmos-testbed key                                     # Print the emulator key"
)]
struct CosmosTestbed {
    #[command(subcommand)]
    command: Commands,

    /// Run in verbose mode with detailed output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Run in debug mode, including emulator log output
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the emulator and keep it running until Ctrl+C
    Start {
        /// Emulator image; must come from the emulator repository
        #[arg(long, default_value = DEFAULT_IMAGE_NAME)]
        image: String,

        /// Seconds to wait for the emulator to report it has started
        #[arg(long, default_value_t = 300)]
        timeout: u64,

        /// Number of partitions the emulator allocates
        #[arg(long)]
        partition_count: Option<u32>,

        /// Keep emulator data across restarts of the same container
        #[arg(long)]
        persist: bool,

        /// Write the emulator TLS certificate (DER) to this file
        #[arg(long)]
        export_certificate: Option<PathBuf>,

        /// Path of the certificate archive inside the container
        #[arg(long, default_value = DEFAULT_CERTIFICATE_PATH)]
        certificate_path: String,

        /// Print connection details as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check whether an image can run as the emulator
    CheckImage {
        /// Image reference, e.g. mcr.microsoft.com/cosmosdb/linux/azure-cosmos-emulator:latest
        image: String,
    },

    /// Print the well-known emulator key
    Key,
}

struct StartOptions {
    image: String,
    timeout: Duration,
    partition_count: Option<u32>,
    persist: bool,
    export_certificate: Option<PathBuf>,
    certificate_path: String,
    json: bool,
}

async fn start_emulator(options: StartOptions) -> Result<(), CliError> {
    let image = check_image(&options.image)?;
    let mut cosmos = CosmosDbEmulatorContainer::new(image.clone())?
        .with_startup_timeout(options.timeout);
    if options.persist {
        cosmos = cosmos.with_data_persistence(true);
    }
    if let Some(partitions) = options.partition_count {
        cosmos = cosmos.with_partition_count(partitions);
    }

    logging::info(&format!("Starting emulator from {}", image));
    cosmos.start().await?;

    let info = ConnectionInfo {
        image,
        container_id: cosmos.id().unwrap_or_default().to_string(),
        endpoint: cosmos.emulator_endpoint().await?,
        key: cosmos.emulator_key().to_string(),
    };
    println!("{}", info.render(options.json)?);

    if let Some(path) = &options.export_certificate {
        let store = cosmos.build_key_store(&options.certificate_path).await?;
        export_certificate(&store, &options.certificate_path, path)?;
        logging::info(&format!("Wrote emulator certificate to {}", path.display()));
    }

    if !options.json {
        println!("\nPress Ctrl+C to stop the emulator.");
    }

    // Runs until the Ctrl+C branch in main wins; cleanup removes the container.
    std::future::pending::<()>().await;
    Ok(())
}

async fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Start {
            image,
            timeout,
            partition_count,
            persist,
            export_certificate,
            certificate_path,
            json,
        } => {
            start_emulator(StartOptions {
                image,
                timeout: Duration::from_secs(timeout),
                partition_count,
                persist,
                export_certificate,
                certificate_path,
                json,
            })
            .await
        }

        Commands::CheckImage { image } => match check_image(&image) {
            Ok(image) => {
                println!("{} {} can run the emulator", "✅".green(), image);
                Ok(())
            }
            Err(e) => {
                println!("{} {}", "❌".red(), e);
                std::process::exit(1);
            }
        },

        Commands::Key => {
            println!("{}", emulator::EMULATOR_KEY);
            Ok(())
        }
    }
}

async fn shutdown(code: i32) {
    // Docker operations can hang; never let cleanup keep the process alive.
    let hard_exit_time = Duration::from_secs(20);
    let _ = std::thread::spawn(move || {
        std::thread::sleep(hard_exit_time);
        eprintln!(
            "Cleanup taking too long (over {} seconds), forcing exit...",
            hard_exit_time.as_secs()
        );
        std::process::exit(1);
    });

    cleanup_on_exit().await;
    std::process::exit(code);
}

#[tokio::main]
async fn main() {
    let cli = CosmosTestbed::parse();

    let json = matches!(cli.command, Commands::Start { json: true, .. });
    configure_logging(cli.verbose, cli.debug, json);

    let code = tokio::select! {
        result = run(cli.command) => match result {
            Ok(()) => 0,
            Err(e) => {
                logging::error(&e.to_string());
                1
            }
        },
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                eprintln!("Warning: Failed to properly listen for ctrl+c event: {}", e);
            }
            eprintln!("Received Ctrl+C, stopping the emulator and cleaning up...");
            0
        }
    };

    shutdown(code).await;
}
