use std::error::Error;
use std::fs;
use std::path::PathBuf;

use log::info;
use structopt::StructOpt;

use agrocheck_serve::{ClassLabels, ImageClassifier, ModelArtifact, SavedModel};

#[derive(StructOpt, Debug)]
#[structopt(
    name = "agrocheck-classify",
    about = "CLI app to classify a potato leaf image with the AgroCheck model"
)]
struct CmdArgs {
    #[structopt(help = "Path to the image file to classify")]
    image: PathBuf,

    #[structopt(
        long,
        help = "Load the SavedModel from a local directory instead of fetching it"
    )]
    export_dir: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = CmdArgs::from_args();

    let model = match args.export_dir {
        Some(dir) => SavedModel::load(&dir)?,
        None => ModelArtifact::new().fetch_and_load()?,
    };
    let classifier = ImageClassifier::new(model, ClassLabels::default());

    let data = fs::read(&args.image)?;
    let prediction = classifier.classify_from_raw(&data)?;
    info!("classified {}", args.image.display());

    println!("{}", serde_json::to_string(&prediction)?);

    Ok(())
}
