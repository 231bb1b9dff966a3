use clap::Parser;
use gbx::{GbxOptions, GbxTrackDecoder, TrackHeader};
use log::{error, info};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Print the header block of a challenge file", long_about = None)]
struct Args {
    /// Challenge/map file to read
    file: PathBuf,

    /// Print the full header as JSON
    #[arg(long)]
    json: bool,

    /// Write the embedded JPEG thumbnail to this path
    #[arg(long)]
    thumbnail: Option<PathBuf>,

    /// Do not parse the embedded XML block
    #[arg(long)]
    no_xml: bool,
}

fn format_time(ms: i32) -> String {
    if ms <= 0 {
        return "-".to_string();
    }
    format!("{}:{:02}.{:03}", ms / 60_000, ms / 1000 % 60, ms % 1000)
}

fn print_summary(header: &TrackHeader) {
    println!("Name:        {}", header.name);
    println!("UID:         {}", header.uid);
    println!("Author:      {} ({})", header.author, header.author_zone);
    println!("Environment: {}", header.environment);
    if let Some(kind) = header.kind {
        println!("Kind:        {}", kind.as_str());
    }
    if let Some(track_type) = header.track_type {
        println!("Type:        {}", track_type.as_str());
    }
    println!("Mood:        {}", header.mood);
    println!(
        "Medals:      {} / {} / {} / {}",
        format_time(header.author_time),
        format_time(header.gold_time),
        format_time(header.silver_time),
        format_time(header.bronze_time)
    );
    println!(
        "Checkpoints: {}  Laps: {}{}",
        header.nb_checkpoints,
        header.nb_laps,
        if header.multi_lap { " (multilap)" } else { "" }
    );
    println!("Cost:        {}", header.cost);
    if !header.exe_version.is_empty() {
        println!("Game:        {} ({})", header.exe_version, header.exe_build);
    }
    if !header.song_file.is_empty() {
        println!("Song:        {}", header.song_file);
    }
    if !header.mod_file.is_empty() {
        println!("Mod:         {}", header.mod_file);
    }
    if !header.comment.is_empty() {
        println!("Comment:     {}", header.comment);
    }
    println!("Thumbnail:   {} bytes", header.thumbnail_len);
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let decoder = GbxTrackDecoder::new(GbxOptions {
        parse_xml: !args.no_xml,
        keep_thumbnail: args.thumbnail.is_some(),
        ..GbxOptions::default()
    });

    let header = match decoder.decode_file(&args.file) {
        Ok(header) => header,
        Err(e) => {
            error!("GBX map error in {}: {}", args.file.display(), e);
            return Err(e.into());
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&header)?);
    } else {
        print_summary(&header);
    }

    if let Some(path) = &args.thumbnail {
        if header.thumbnail.is_empty() {
            error!("{} has no thumbnail", args.file.display());
        } else {
            std::fs::write(path, &header.thumbnail)?;
            info!("Wrote {} byte thumbnail to {}", header.thumbnail.len(), path.display());
        }
    }

    Ok(())
}
