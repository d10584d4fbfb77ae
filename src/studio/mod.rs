pub mod backgrounds;
pub mod form;
pub mod photos;
pub mod view;

use crate::gateway::{GatewayError, ImagePayload, InferenceGateway};
use backgrounds::{
    BackgroundCatalog, BackgroundId, BackgroundSummary, DEFAULT_SEED_PROMPT, SEEDED_PROMPT,
};
use form::{DetailsPatch, ProductDetails};
use futures::future::join_all;
use photos::{MAX_PHOTOS, PhotoCollection, PhotoId, PhotoSummary, PhotoUpload};
use serde::Serialize;
use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};
use thiserror::Error;
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tracing::{info, warn};
use view::{ProductPage, ViewMode};

#[derive(Debug, Default)]
struct ListingState {
    photos: PhotoCollection,
    backgrounds: BackgroundCatalog,
    details: ProductDetails,
    view: ViewMode,
}

impl ListingState {
    fn is_form_complete(&self) -> bool {
        form::is_form_complete(
            self.photos.len(),
            self.photos.enhanced_count(),
            &self.details,
        )
    }

    /// The product page is read-only; edits need a trip back to the form.
    fn ensure_editing(&self, action: &'static str) -> Result<(), StudioError> {
        match self.view {
            ViewMode::Editing => Ok(()),
            ViewMode::Viewing => Err(StudioError::published(action)),
        }
    }
}

#[derive(Debug, Default)]
struct InFlight {
    filling_details: AtomicBool,
    enhancing: AtomicBool,
    generating_background: AtomicBool,
}

/// Holds one in-flight flag for the lifetime of an operation. Released on drop,
/// so an abandoned request cannot leave the flag stuck.
struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn claim(flag: &'a AtomicBool, action: &'static str) -> Result<Self, StudioError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| StudioError::busy(action, "already in progress"))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Marks the default background ready when dropped, including while unwinding
/// from a panicked seeding task.
struct ReadyOnDrop<'a>(&'a watch::Sender<bool>);

impl Drop for ReadyOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

/// The listing studio: photos, backgrounds, product fields and the view switch,
/// plus the remote calls that feed them.
///
/// State is only locked between remote calls, never across one.
#[derive(Clone)]
pub struct Studio {
    state: Arc<Mutex<ListingState>>,
    gateway: Arc<dyn InferenceGateway>,
    in_flight: Arc<InFlight>,
    default_ready: Arc<watch::Sender<bool>>,
}

impl Studio {
    pub fn new(gateway: Arc<dyn InferenceGateway>) -> Self {
        let (default_ready, _) = watch::channel(false);
        Self {
            state: Arc::new(Mutex::new(ListingState::default())),
            gateway,
            in_flight: Arc::new(InFlight::default()),
            default_ready: Arc::new(default_ready),
        }
    }

    /// Builds a studio and starts seeding the default background in the background.
    pub fn start(gateway: Arc<dyn InferenceGateway>) -> (Self, JoinHandle<()>) {
        let studio = Self::new(gateway);
        let seeding = studio.clone();
        let handle = tokio::spawn(async move { seeding.seed_default_background().await });
        (studio, handle)
    }

    /// Generates the neutral default background. Failure installs the embedded
    /// fallback; either way the default is marked ready afterwards.
    pub async fn seed_default_background(&self) {
        let _ready = ReadyOnDrop(&self.default_ready);
        let outcome = timed(
            "generate_background",
            self.gateway.generate_background(DEFAULT_SEED_PROMPT),
        )
        .await;
        {
            let mut state = self.state.lock().await;
            match outcome {
                Ok(image) => {
                    state.backgrounds.replace_default(image, SEEDED_PROMPT);
                    info!(target = "studio.backgrounds", "default_background_seeded");
                }
                Err(err) => {
                    warn!(target = "studio.backgrounds", error = %err, "default_background_fallback");
                    state.backgrounds.install_fallback_default();
                }
            }
        }
    }

    pub fn is_default_ready(&self) -> bool {
        *self.default_ready.borrow()
    }

    async fn wait_for_default(&self) {
        let mut ready = self.default_ready.subscribe();
        // The sender lives as long as `self`, so this only returns once seeded.
        let _ = ready.wait_for(|ready| *ready).await;
    }

    pub async fn add_photos(&self, uploads: &[PhotoUpload]) -> Result<Vec<PhotoId>, StudioError> {
        let mut state = self.state.lock().await;
        state.ensure_editing("add_photos")?;
        let added = state
            .photos
            .add(uploads)
            .map_err(|err| StudioError::invalid_input("add_photos", err.to_string()))?;
        info!(
            target = "studio.photos",
            submitted = uploads.len(),
            added = added.len(),
            total = state.photos.len(),
            "photos_added"
        );
        Ok(added)
    }

    pub async fn remove_photo(&self, id: PhotoId) -> Result<bool, StudioError> {
        let mut state = self.state.lock().await;
        state.ensure_editing("remove_photo")?;
        Ok(state.photos.remove(id))
    }

    /// Image bytes for one photo, or `None` if the photo or variant is missing.
    pub async fn photo_image(&self, id: PhotoId, enhanced: Option<bool>) -> Option<ImagePayload> {
        let state = self.state.lock().await;
        let photo = state.photos.get(id)?;
        match enhanced {
            Some(true) => photo.enhanced.clone(),
            Some(false) => Some(photo.original.clone()),
            None => Some(photo.display().clone()),
        }
    }

    pub async fn update_details(&self, patch: DetailsPatch) -> Result<ProductDetails, StudioError> {
        let mut state = self.state.lock().await;
        state.ensure_editing("update_details")?;
        state.details.apply(patch);
        Ok(state.details.clone())
    }

    /// Fills title, description and price from the first photo, replacing
    /// whatever the fields held. Fields stay untouched on failure.
    pub async fn auto_fill_details(&self) -> Result<ProductDetails, StudioError> {
        let _flight = FlightGuard::claim(&self.in_flight.filling_details, "auto_fill_details")?;
        let image = {
            let state = self.state.lock().await;
            state.ensure_editing("auto_fill_details")?;
            state.photos.first().map(|photo| photo.original.clone())
        }
        .ok_or_else(|| StudioError::invalid_input("auto_fill_details", "add a photo first"))?;

        let fields = timed(
            "extract_listing_fields",
            self.gateway.extract_listing_fields(&image),
        )
        .await
        .map_err(|err| StudioError::remote("auto_fill_details", err))?;

        let mut state = self.state.lock().await;
        // the listing may have been published while the call was out
        state.ensure_editing("auto_fill_details")?;
        state.details = fields.into();
        info!(target = "studio.form", "details_auto_filled");
        Ok(state.details.clone())
    }

    /// Composites every not-yet-enhanced photo onto the selected background.
    /// All calls settle before anything is written back; successes are kept
    /// even when some calls fail, and failures are reported as one error.
    pub async fn enhance_all_photos(&self) -> Result<EnhanceReport, StudioError> {
        let _flight = FlightGuard::claim(&self.in_flight.enhancing, "enhance_photos")?;

        let waits_on_default = {
            let state = self.state.lock().await;
            state.ensure_editing("enhance_photos")?;
            if state.photos.is_empty() {
                return Err(StudioError::invalid_input(
                    "enhance_photos",
                    "add a photo first",
                ));
            }
            state.backgrounds.selected().is_default()
        };
        if waits_on_default && !self.is_default_ready() {
            info!(target = "studio.enhance", "waiting_for_default_background");
            self.wait_for_default().await;
        }

        let (pending, background) = {
            let state = self.state.lock().await;
            (
                state.photos.pending_enhancement(),
                state.backgrounds.selected().image.clone(),
            )
        };
        let requested = pending.len();

        let started = Instant::now();
        let calls = pending.iter().map(|(id, original)| {
            let background = &background;
            async move {
                (
                    *id,
                    self.gateway
                        .composite_on_background(original, background)
                        .await,
                )
            }
        });
        let settled = join_all(calls).await;
        crate::metrics::gateway_elapsed(
            "composite_on_background",
            started.elapsed().as_millis(),
            settled.iter().all(|(_, outcome)| outcome.is_ok()),
        );

        let mut state = self.state.lock().await;
        let mut enhanced = 0;
        let mut failures = Vec::new();
        for (id, outcome) in settled {
            match outcome {
                Ok(image) => {
                    if state.photos.set_enhanced(id, image) {
                        enhanced += 1;
                    }
                }
                Err(err) => {
                    warn!(target = "studio.enhance", photo_id = %id, error = %err, "photo_enhance_failed");
                    failures.push(err);
                }
            }
        }
        let report = EnhanceReport {
            requested,
            enhanced,
            failed: failures.len(),
            enhanced_count: state.photos.enhanced_count(),
            photo_count: state.photos.len(),
        };
        info!(
            target = "studio.enhance",
            requested = report.requested,
            enhanced = report.enhanced,
            failed = report.failed,
            "enhance_batch_settled"
        );

        match failures.into_iter().next() {
            None => Ok(report),
            Some(first) => Err(StudioError::remote(
                "enhance_photos",
                format!(
                    "{} of {} photos could not be enhanced: {first}",
                    report.failed, report.requested
                ),
            )),
        }
    }

    pub async fn select_background(&self, id: BackgroundId) -> Result<(), StudioError> {
        let mut state = self.state.lock().await;
        state.ensure_editing("select_background")?;
        state.backgrounds.select(id);
        Ok(())
    }

    /// Generates a custom background from `prompt` and selects it.
    pub async fn create_background(&self, prompt: &str) -> Result<BackgroundSummary, StudioError> {
        if prompt.trim().is_empty() {
            return Err(StudioError::invalid_input(
                "create_background",
                "describe the background first",
            ));
        }
        self.state.lock().await.ensure_editing("create_background")?;
        let _flight = FlightGuard::claim(
            &self.in_flight.generating_background,
            "create_background",
        )?;

        let image = timed(
            "generate_background",
            self.gateway.generate_background(prompt),
        )
        .await
        .map_err(|err| StudioError::remote("create_background", err))?;

        let mut state = self.state.lock().await;
        let id = state.backgrounds.insert_custom(image, prompt);
        info!(target = "studio.backgrounds", background_id = %id, "background_created");
        Ok(state.backgrounds.selected().summary(true))
    }

    pub async fn delete_background(&self, id: BackgroundId) -> Result<bool, StudioError> {
        let mut state = self.state.lock().await;
        state.ensure_editing("delete_background")?;
        Ok(state.backgrounds.delete(id))
    }

    pub async fn background_image(&self, id: BackgroundId) -> Option<ImagePayload> {
        let state = self.state.lock().await;
        state.backgrounds.get(id).map(|background| background.image.clone())
    }

    pub async fn backgrounds(&self) -> (Vec<BackgroundSummary>, BackgroundSummary) {
        let state = self.state.lock().await;
        (
            state.backgrounds.summaries(),
            state.backgrounds.selected().summary(true),
        )
    }

    pub fn is_generating_background(&self) -> bool {
        self.in_flight.generating_background.load(Ordering::Acquire)
    }

    /// Switches to the product view when the form is complete; otherwise a no-op.
    pub async fn create_listing(&self) -> ViewMode {
        let mut state = self.state.lock().await;
        let complete = state.is_form_complete();
        state.view = state.view.publish(complete);
        state.view
    }

    pub async fn back_to_editing(&self) -> ViewMode {
        let mut state = self.state.lock().await;
        state.view = state.view.back();
        state.view
    }

    /// Wipes photos and fields, resets the background selection and returns to
    /// the edit view. Custom backgrounds stay in the catalog.
    pub async fn delete_listing(&self) {
        let mut state = self.state.lock().await;
        state.photos.clear();
        state.details = ProductDetails::default();
        state.backgrounds.reset_selection();
        state.view = ViewMode::Editing;
        info!(target = "studio.listing", "listing_deleted");
    }

    pub async fn product_page(&self) -> Option<ProductPage> {
        let state = self.state.lock().await;
        (state.view == ViewMode::Viewing && state.is_form_complete())
            .then(|| ProductPage::render(&state.photos, &state.details))
    }

    pub async fn snapshot(&self) -> StudioSnapshot {
        let state = self.state.lock().await;
        StudioSnapshot {
            photos: state.photos.iter().map(PhotoSummary::from).collect(),
            photo_count: state.photos.len(),
            enhanced_count: state.photos.enhanced_count(),
            remaining_slots: state.photos.remaining_slots(),
            max_photos: MAX_PHOTOS,
            details: state.details.clone(),
            backgrounds: state.backgrounds.summaries(),
            selected_background: state.backgrounds.selected().summary(true),
            default_ready: self.is_default_ready(),
            is_form_complete: state.is_form_complete(),
            view: state.view,
            in_flight: InFlightSnapshot {
                filling_details: self.in_flight.filling_details.load(Ordering::Acquire),
                enhancing: self.in_flight.enhancing.load(Ordering::Acquire),
                generating_background: self.is_generating_background(),
            },
        }
    }
}

async fn timed<T, Fut>(call: &'static str, fut: Fut) -> Result<T, GatewayError>
where
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let started = Instant::now();
    let outcome = fut.await;
    crate::metrics::gateway_elapsed(call, started.elapsed().as_millis(), outcome.is_ok());
    outcome
}

#[derive(Debug, Clone, Serialize)]
pub struct EnhanceReport {
    pub requested: usize,
    pub enhanced: usize,
    pub failed: usize,
    pub enhanced_count: usize,
    pub photo_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct InFlightSnapshot {
    pub filling_details: bool,
    pub enhancing: bool,
    pub generating_background: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudioSnapshot {
    pub photos: Vec<PhotoSummary>,
    pub photo_count: usize,
    pub enhanced_count: usize,
    pub remaining_slots: usize,
    pub max_photos: usize,
    pub details: ProductDetails,
    pub backgrounds: Vec<BackgroundSummary>,
    pub selected_background: BackgroundSummary,
    pub default_ready: bool,
    pub is_form_complete: bool,
    pub view: ViewMode,
    pub in_flight: InFlightSnapshot,
}

#[derive(Debug, Error)]
#[error("`{action}` failed: {message}")]
pub struct StudioError {
    action: &'static str,
    message: String,
    kind: StudioErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudioErrorKind {
    InvalidInput,
    NotFound,
    Busy,
    Published,
    Remote,
}

impl StudioError {
    pub fn invalid_input(action: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(action, message, StudioErrorKind::InvalidInput)
    }

    pub fn not_found(action: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(action, message, StudioErrorKind::NotFound)
    }

    pub fn busy(action: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(action, message, StudioErrorKind::Busy)
    }

    pub fn published(action: &'static str) -> Self {
        Self::with_kind(
            action,
            "the listing is published; go back to editing first",
            StudioErrorKind::Published,
        )
    }

    pub fn remote(action: &'static str, message: impl ToString) -> Self {
        Self::with_kind(action, message.to_string(), StudioErrorKind::Remote)
    }

    fn with_kind(action: &'static str, message: impl Into<String>, kind: StudioErrorKind) -> Self {
        Self {
            action,
            message: message.into(),
            kind,
        }
    }

    pub fn action(&self) -> &'static str {
        self.action
    }

    pub fn kind(&self) -> StudioErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}
