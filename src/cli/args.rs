use clap::Parser;

#[derive(Parser, Debug, Clone, Default)]
#[command(
    name = "plastid-pipelines",
    version,
    about = "Reference-guided chloroplast genome reconstruction from short reads"
)]
pub struct Arguments {

    #[arg(short = 'v', long = "verbose", action)]
    pub verbose: bool,

    #[arg(
        short = 'r',
        long = "reads",
        num_args = 1..,
        help = "FASTQ inputs. Paired files are grouped as '{R1}{R2}', anything else is read as single-end."
    )]
    pub reads: Vec<String>,

    #[arg(short = 'a', long = "accessions", num_args = 1.., help = "SRA accessions to stream through the aligner")]
    pub accessions: Vec<String>,

    #[arg(short = 'f', long = "reference", help = "Related-species chloroplast FASTA")]
    pub reference: String,

    #[arg(short = 'o', long = "out", help = "Output directory for all generated files.")]
    pub out_dir: String,

    #[arg(short = 's', long = "species", help = "Species name, e.g. Nicotiana_benthamiana. Used to name the consensus.")]
    pub species: Option<String>,

    #[arg(short = 't', long, default_value_t = 4)]
    pub threads: usize,

    #[arg(
        short = 'm',
        long = "polish-mem",
        allow_hyphen_values = true,
        help = "JVM memory option for the polisher (-Xmx/-Xms only), may be repeated"
    )]
    pub polish_mem: Vec<String>,

    #[arg(long, default_value_t = false, help = "Keep downloaded SRA cache files")]
    pub keep_cache: bool,
}
