use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use openehr::{read_result_set_json, write_result_set_json, ResultSet};
use psn_core::psn::PseudonymGenerator;
use psn_core::recordlinkage::{FederatedMatcher, MatchedPerson};
use psn_core::translation::{
    FromMedicWithRbf, FromTtp, ResearchResultFromTtp, ResearchResultToTtp, RowExecutor, ToMedic,
    ToTtp, ToTtpCreateRbf, ToTtpEncrypt, ToTtpRbfOnly,
};
use psn_core::{BloomFilterConfig, LinkageConfig, ResultSetTranslator, StudyContext};
use psn_mpi::{MasterPatientIndexClient, MasterPatientIndexClientStub};
use psn_types::{KeyMaterial, NonEmptyText};

#[derive(Parser)]
#[command(name = "psn")]
#[command(about = "Privacy-preserving record linkage and pseudonymization")]
struct Cli {
    /// Linkage configuration (YAML); defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh 32-byte key (base64)
    GenerateKey,
    /// Print a fresh 72-byte Bloom filter config (base64)
    GenerateBloomFilterConfig,
    /// Run one translator over a result-set JSON file
    Translate {
        #[arg(value_enum)]
        translator: TranslatorName,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Patient roster (YAML or JSON) for the in-memory MPI; the demo roster when omitted
        #[arg(long)]
        mpi: Option<PathBuf>,
        #[arg(long, env = "PSN_ORGANIZATION")]
        organization: Option<NonEmptyText>,
        #[arg(long, env = "PSN_RESEARCH_STUDY")]
        research_study: Option<NonEmptyText>,
        #[arg(long, env = "PSN_ORGANIZATION_KEY", hide_env_values = true)]
        organization_key: Option<KeyMaterial>,
        #[arg(long, env = "PSN_RESEARCH_STUDY_KEY", hide_env_values = true)]
        research_study_key: Option<KeyMaterial>,
        #[arg(
            long,
            env = "PSN_BLOOM_FILTER_CONFIG",
            hide_env_values = true,
            value_parser = BloomFilterConfig::from_base64
        )]
        bloom_filter_config: Option<BloomFilterConfig>,
    },
    /// Match persons across organizations and write one pseudonymized result set per organization
    Match {
        /// `<organization>=<file>`, one per organization
        #[arg(long = "input", required = true, value_parser = parse_organization_input)]
        inputs: Vec<(NonEmptyText, PathBuf)>,
        #[arg(long)]
        output_dir: PathBuf,
        #[arg(long, env = "PSN_RESEARCH_STUDY")]
        research_study: NonEmptyText,
        #[arg(long, env = "PSN_RESEARCH_STUDY_TTP_KEY", hide_env_values = true)]
        research_study_ttp_key: KeyMaterial,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TranslatorName {
    ToTtp,
    ToTtpCreateRbf,
    ToTtpRbfOnly,
    ToTtpEncrypt,
    FromTtp,
    ResearchResultFromTtp,
    ResearchResultToTtp,
}

impl TranslatorName {
    fn needs_mpi(self) -> bool {
        matches!(
            self,
            TranslatorName::ToTtp | TranslatorName::ToTtpCreateRbf | TranslatorName::ToTtpRbfOnly
        )
    }
}

fn parse_organization_input(raw: &str) -> Result<(NonEmptyText, PathBuf), String> {
    let (organization, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <organization>=<file>, got {raw:?}"))?;
    let organization = NonEmptyText::new(organization).map_err(|e| e.to_string())?;
    // The name becomes the output file stem in --output-dir.
    if matches!(organization.as_str(), "." | "..")
        || organization.as_str().contains(['/', '\\', '\0'])
    {
        return Err(format!("organization {:?} is not a valid file name", organization.as_str()));
    }
    if path.is_empty() {
        return Err(format!("missing file for organization {organization}"));
    }
    Ok((organization, PathBuf::from(path)))
}

fn read_result_set(path: &Path) -> anyhow::Result<ResultSet> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    read_result_set_json(&json).with_context(|| format!("invalid result set in {}", path.display()))
}

fn write_result_set(path: &Path, result_set: &ResultSet) -> anyhow::Result<()> {
    let json = write_result_set_json(result_set)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

struct TranslateArgs {
    translator: TranslatorName,
    mpi: Option<PathBuf>,
    organization: Option<NonEmptyText>,
    research_study: Option<NonEmptyText>,
    organization_key: Option<KeyMaterial>,
    research_study_key: Option<KeyMaterial>,
    bloom_filter_config: Option<BloomFilterConfig>,
}

impl TranslateArgs {
    fn study_context(&self) -> anyhow::Result<StudyContext> {
        Ok(StudyContext {
            organization_identifier: self
                .organization
                .clone()
                .context("--organization or PSN_ORGANIZATION is required")?,
            organization_key: self
                .organization_key
                .clone()
                .context("--organization-key or PSN_ORGANIZATION_KEY is required")?,
            research_study_identifier: self
                .research_study
                .clone()
                .context("--research-study or PSN_RESEARCH_STUDY is required")?,
            research_study_key: self
                .research_study_key
                .clone()
                .context("--research-study-key or PSN_RESEARCH_STUDY_KEY is required")?,
        })
    }

    fn mpi(&self) -> anyhow::Result<Arc<dyn MasterPatientIndexClient>> {
        let stub = match &self.mpi {
            Some(path) => MasterPatientIndexClientStub::load(path)
                .with_context(|| format!("failed to load MPI roster {}", path.display()))?,
            None => {
                tracing::warn!("no --mpi roster given, using the built-in demo roster");
                MasterPatientIndexClientStub::demo()
            }
        };
        Ok(Arc::new(stub))
    }

    fn build(&self, config: &LinkageConfig) -> anyhow::Result<Box<dyn ResultSetTranslator>> {
        let executor = RowExecutor::from_config(config)?;

        if self.translator.needs_mpi() {
            let bloom_filter_config = self
                .bloom_filter_config
                .as_ref()
                .context("--bloom-filter-config or PSN_BLOOM_FILTER_CONFIG is required")?;
            let generator = Arc::new(config.record_bloom_filter_generator(bloom_filter_config)?);
            let mpi = self.mpi()?;
            let policy = config.idat_not_found;

            let translator: Box<dyn ResultSetTranslator> = match self.translator {
                TranslatorName::ToTtp => Box::new(ToTtp::new(
                    &self.study_context()?,
                    mpi,
                    generator,
                    policy,
                    executor,
                )),
                TranslatorName::ToTtpCreateRbf => {
                    Box::new(ToTtpCreateRbf::new(mpi, generator, policy, executor))
                }
                _ => Box::new(ToTtpRbfOnly::new(mpi, generator, policy, executor)),
            };
            return Ok(translator);
        }

        let context = self.study_context()?;
        let translator: Box<dyn ResultSetTranslator> = match self.translator {
            TranslatorName::ToTtpEncrypt => Box::new(ToTtpEncrypt::new(&context, executor)),
            TranslatorName::FromTtp => Box::new(FromTtp::new(&context, executor)),
            TranslatorName::ResearchResultFromTtp => {
                Box::new(ResearchResultFromTtp::new(&context, executor))
            }
            TranslatorName::ResearchResultToTtp => {
                Box::new(ResearchResultToTtp::new(&context, executor))
            }
            other => bail!("translator {other:?} needs an MPI"),
        };
        Ok(translator)
    }
}

fn run_match(
    config: &LinkageConfig,
    inputs: Vec<(NonEmptyText, PathBuf)>,
    output_dir: &Path,
    research_study: NonEmptyText,
    research_study_ttp_key: &KeyMaterial,
) -> anyhow::Result<()> {
    let reader = FromMedicWithRbf::new(
        config.record_bloom_filter_length,
        RowExecutor::from_config(config)?,
    );

    let mut templates = BTreeMap::new();
    let mut organizations = Vec::with_capacity(inputs.len());
    for (organization, path) in inputs {
        if templates.contains_key(&organization) {
            bail!("organization {organization} given more than once");
        }
        let batch = reader
            .translate(organization, &read_result_set(&path)?)
            .with_context(|| format!("invalid TTP input {}", path.display()))?;
        templates.insert(batch.organization, batch.template);
        organizations.push(batch.persons);
    }

    let matcher = FederatedMatcher::new(config.match_threshold, MatchedPerson::new)?;
    let clusters = matcher.match_persons(organizations)?;
    tracing::info!("found {} clusters", clusters.len());

    let pseudonymized = PseudonymGenerator::new(research_study, research_study_ttp_key)
        .create_pseudonyms_and_shuffle(clusters)?;
    let outputs = ToMedic::new().translate(&templates, &pseudonymized)?;

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    for (organization, result_set) in outputs {
        let path = output_dir.join(format!("{organization}.json"));
        write_result_set(&path, &result_set)?;
        println!("{}: {} rows -> {}", organization, result_set.rows.len(), path.display());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive("psn=info".parse()?))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => LinkageConfig::load(path)?,
        None => LinkageConfig::default(),
    };

    match cli.command {
        Commands::GenerateKey => println!("{}", KeyMaterial::generate().to_base64()),
        Commands::GenerateBloomFilterConfig => {
            println!("{}", BloomFilterConfig::generate().to_base64())
        }
        Commands::Translate {
            translator,
            input,
            output,
            mpi,
            organization,
            research_study,
            organization_key,
            research_study_key,
            bloom_filter_config,
        } => {
            let args = TranslateArgs {
                translator,
                mpi,
                organization,
                research_study,
                organization_key,
                research_study_key,
                bloom_filter_config,
            };
            let translator = args.build(&config)?;
            let input_set = read_result_set(&input)?;
            let output_set = translator.translate(&input_set)?;

            tracing::info!(
                translator = translator.name(),
                input_rows = input_set.rows.len(),
                output_rows = output_set.rows.len(),
                "translated {}",
                input.display()
            );
            write_result_set(&output, &output_set)?;
        }
        Commands::Match {
            inputs,
            output_dir,
            research_study,
            research_study_ttp_key,
        } => run_match(
            &config,
            inputs,
            &output_dir,
            research_study,
            &research_study_ttp_key,
        )?,
    }

    Ok(())
}
