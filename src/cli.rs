use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ytstream")]
#[command(author, version, about = "Streams YouTube video and MP3 downloads from yt-dlp straight to HTTP clients", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API (default when no command is given)
    Serve {
        /// Bind address (overrides HOST)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (overrides PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// yt-dlp binary (overrides YTDL_BIN)
        #[arg(long)]
        ytdl_bin: Option<String>,
    },

    /// Print metadata for a video, the same document /api/info returns
    Info {
        /// YouTube URL
        url: String,

        /// Print the /api/info JSON body instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Check that yt-dlp is installed and print its version
    Check,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
