//! Wiring of configuration, adapters and stores into the use cases.

use crate::prompts::PromptRenderer;
use crate::report_service::NeighborhoodReportService;
use crate::scoring_service::ScoringService;
use crate::session::{SessionFactory, SessionServices};
use crate::vision_orchestrator::VisionOrchestrator;
use civic_core::config::AppConfig;
use civic_core::context::{NearbySearch, SnapshotProvider};
use civic_core::error::Result;
use civic_core::identity::IdentityProvider;
use civic_core::proposal::ProposalRepository;
use civic_infrastructure::{ConfigService, open_repository};
use civic_interaction::{GoogleMapsClient, ModelGateways, build_gateways};
use std::sync::Arc;
use tracing::{info, warn};

/// Mapping adapters, absent when no Maps key is configured.
#[derive(Clone, Default)]
pub struct MapServices {
    pub snapshots: Option<Arc<dyn SnapshotProvider>>,
    pub nearby: Option<Arc<dyn NearbySearch>>,
}

impl MapServices {
    pub fn google(client: GoogleMapsClient) -> Self {
        let client = Arc::new(client);
        Self {
            snapshots: Some(client.clone()),
            nearby: Some(client),
        }
    }
}

/// Everything a front end needs.
pub struct CivicApp {
    pub config: AppConfig,
    pub sessions: SessionFactory,
    pub repository: Arc<dyn ProposalRepository>,
    pub scoring: ScoringService,
    pub reports: NeighborhoodReportService,
    pub identity: Arc<dyn IdentityProvider>,
    /// Running on the offline demo agent.
    pub demo_mode: bool,
}

impl CivicApp {
    /// Loads config and secrets, then opens the configured store and models.
    pub async fn bootstrap(
        config_service: &ConfigService,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self> {
        let config = config_service.get_config().await?;
        let secrets = config_service.load_secrets().await?;

        let gateways = build_gateways(
            secrets.gemini.as_ref(),
            &config.models,
            config.timeouts.inference_budget(),
        );
        let maps = match &secrets.google_maps {
            Some(maps) if !maps.api_key.trim().is_empty() => {
                MapServices::google(GoogleMapsClient::new(maps.api_key.clone()))
            }
            _ => {
                warn!("No Google Maps API key configured, snapshots and competitor search are disabled");
                MapServices::default()
            }
        };
        let repository = open_repository(
            config.storage.backend,
            config_service.paths(),
            secrets.firestore.as_ref(),
            identity.clone(),
            config.timeouts.persistence(),
        )
        .await?;

        Self::assemble(config, gateways, maps, repository, identity)
    }

    /// Builds the services from already-constructed collaborators.
    pub fn assemble(
        config: AppConfig,
        gateways: ModelGateways,
        maps: MapServices,
        repository: Arc<dyn ProposalRepository>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self> {
        let prompts = Arc::new(PromptRenderer::new()?);
        let timeouts = config.timeouts.clone();

        let vision = Arc::new(VisionOrchestrator::new(
            maps.snapshots,
            gateways.vision_analysis.with_budget(timeouts.analysis()),
            gateways.image_generation.with_budget(timeouts.vision_total()),
            prompts.clone(),
            timeouts.clone(),
        ));
        let sessions = SessionFactory::new(SessionServices {
            chat: gateways.chat.clone(),
            vision,
            repository: repository.clone(),
            identity: identity.clone(),
            prompts: prompts.clone(),
            dialogue: config.dialogue.clone(),
            persistence_timeout: timeouts.persistence(),
        });
        let scoring = ScoringService::new(
            gateways.chat.clone(),
            maps.nearby,
            prompts.clone(),
            timeouts.snapshot(),
        );
        let reports = NeighborhoodReportService::new(repository.clone(), gateways.chat, prompts);

        info!(
            demo_mode = gateways.demo_mode,
            score_scale = %config.dialogue.score_scale,
            "CivicSense services ready"
        );
        Ok(Self {
            config,
            sessions,
            repository,
            scoring,
            reports,
            identity,
            demo_mode: gateways.demo_mode,
        })
    }
}
