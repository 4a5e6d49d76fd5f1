use super::models::{
    BrewResponse, DataPoint, DeviceTokenResponse, EndBrewRequest, HydrometerList, LinkRecipeRequest,
    RegisterBrewRequest, RegisterHydrometerRequest, RegisterHydrometerResponse, newest_open_brew,
};
use super::{
    ApiError, BREW_PATH, Brew, DATA_POINT_PATH, DEVICE_TOKEN_PATH, HYDROMETER_PATH, Hydrometer,
    REGISTER_HYDROMETER_PATH, RemoteId, SyncClient, SyncError,
};
use crate::session::SessionSnapshot;

impl SyncClient {
    /// Refresh the hydrometer cache.
    pub async fn get_hydrometers(&self) -> bool {
        let request = self.authorized(self.http.get(self.endpoint(HYDROMETER_PATH))).await;
        match self.send_json::<HydrometerList>(request).await {
            Ok(list) => {
                let devices = list.into_devices();
                tracing::debug!(count = devices.len(), "fetched hydrometers");
                self.cache.write().await.hydrometers = devices;
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to get hydrometers");
                self.observer
                    .on_status(&format!("Failed to get hydrometers from MeadTools: {e}"));
                false
            }
        }
    }

    /// Refresh the brew cache.
    pub async fn get_brews(&self) -> bool {
        let request = self.authorized(self.http.get(self.endpoint(BREW_PATH))).await;
        match self.send_json::<Vec<Brew>>(request).await {
            Ok(brews) => {
                tracing::debug!(count = brews.len(), "fetched brews");
                self.cache.write().await.brews = brews;
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to get brews");
                false
            }
        }
    }

    /// Cached hydrometer registered under `name`.
    pub async fn find_hydrometer(&self, name: &str) -> Option<Hydrometer> {
        self.cache
            .read()
            .await
            .hydrometers
            .iter()
            .find(|h| h.device_name.as_deref() == Some(name))
            .cloned()
    }

    /// Cached open brew named `name`; the most recently started one if several match.
    pub async fn find_open_brew(&self, name: &str) -> Option<Brew> {
        newest_open_brew(&self.cache.read().await.brews, name).cloned()
    }

    /// Register a hydrometer under the account's device token.
    pub async fn register_hydrometer(&self, name: &str) -> Result<RemoteId, SyncError> {
        let token = self
            .device_token()
            .await
            .ok_or(SyncError::MissingIdentifier("device token"))?;

        tracing::info!(hydrometer = name, "registering hydrometer");
        let body = RegisterHydrometerRequest { token: &token, name };
        let request = self.http.post(self.endpoint(REGISTER_HYDROMETER_PATH)).json(&body);

        let RegisterHydrometerResponse { id } = self
            .send_json(request)
            .await
            .map_err(|source| SyncError::Registration {
                entity: format!("hydrometer {name:?}"),
                source,
            })?;

        self.cache.write().await.hydrometers.push(Hydrometer {
            id: id.clone(),
            device_name: Some(name.to_string()),
        });
        Ok(id)
    }

    /// Create a brew for `hydrometer_id` and return it.
    pub async fn register_brew(
        &self,
        name: &str,
        hydrometer_id: &RemoteId,
    ) -> Result<Brew, SyncError> {
        tracing::info!(brew = name, hydrometer = %hydrometer_id, "registering brew");
        let body = RegisterBrewRequest {
            device_id: hydrometer_id,
            brew_name: name,
        };
        let request = self
            .authorized(self.http.post(self.endpoint(BREW_PATH)).json(&body))
            .await;

        let registration_error = |source| SyncError::Registration {
            entity: format!("brew {name:?}"),
            source,
        };
        let response: BrewResponse = self.send_json(request).await.map_err(registration_error)?;

        let mut cache = self.cache.write().await;
        let created = match response {
            BrewResponse::One(brew) => {
                cache.brews.retain(|b| b.id != brew.id);
                cache.brews.push(brew.clone());
                brew
            }
            BrewResponse::Many(brews) => {
                let created = newest_open_brew(&brews, name)
                    .or_else(|| brews.first())
                    .cloned()
                    .ok_or_else(|| registration_error(ApiError::Empty("brew")))?;
                cache.brews = brews;
                created
            }
        };
        Ok(created)
    }

    /// Attach a recipe to a brew. Does nothing when no recipe is configured.
    pub async fn link_brew_to_recipe(
        &self,
        brew_id: &RemoteId,
        recipe_id: Option<i64>,
    ) -> Result<(), SyncError> {
        let Some(recipe_id) = recipe_id else {
            tracing::debug!(brew = %brew_id, "no recipe configured, not linking");
            return Ok(());
        };

        tracing::info!(brew = %brew_id, recipe_id, "linking brew to recipe");
        let url = format!("{}/{brew_id}", self.endpoint(BREW_PATH));
        let request = self
            .authorized(self.http.patch(url).json(&LinkRecipeRequest { recipe_id }))
            .await;

        self.send(request)
            .await
            .map_err(|source| SyncError::RecipeLink {
                brew_id: brew_id.clone(),
                recipe_id,
                source,
            })?;

        if let Some(brew) = self.cache.write().await.brews.iter_mut().find(|b| b.id == *brew_id) {
            brew.recipe_id = Some(RemoteId::Int(recipe_id));
        }
        Ok(())
    }

    /// Mark a brew as finished.
    ///
    /// # Errors
    /// [`SyncError::MissingIdentifier`] if either id is absent. A rejected
    /// request is reported as `Ok(false)`.
    pub async fn end_brew(
        &self,
        hydrometer_id: Option<&RemoteId>,
        brew_id: Option<&RemoteId>,
    ) -> Result<bool, SyncError> {
        let device_id = hydrometer_id.ok_or(SyncError::MissingIdentifier("hydrometer id"))?;
        let brew_id = brew_id.ok_or(SyncError::MissingIdentifier("brew id"))?;

        tracing::info!(brew = %brew_id, hydrometer = %device_id, "ending brew");
        let body = EndBrewRequest { device_id, brew_id };
        let request = self
            .authorized(self.http.patch(self.endpoint(BREW_PATH)).json(&body))
            .await;

        let response = match self.send(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(brew = %brew_id, error = %e, "failed to end brew");
                return Ok(false);
            }
        };

        match response.json::<Brew>().await {
            Ok(ended) => {
                let mut cache = self.cache.write().await;
                if let Some(brew) = cache.brews.iter_mut().find(|b| b.id == *brew_id) {
                    brew.end_date = ended.end_date;
                }
            }
            Err(e) => tracing::debug!(brew = %brew_id, error = %e, "end brew response not understood"),
        }
        Ok(true)
    }

    /// Delete a finished brew. Open brews are refused without calling the service.
    pub async fn delete_brew(&self, brew: &Brew) -> bool {
        if brew.is_open() {
            tracing::warn!(brew = brew.name(), "brew has not ended, refusing to delete");
            return false;
        }

        let url = format!("{}/{}", self.endpoint(BREW_PATH), brew.id);
        let request = self.authorized(self.http.delete(url)).await;
        match self.send(request).await {
            Ok(_) => {
                tracing::info!(brew = brew.name(), "deleted brew");
                self.cache.write().await.brews.retain(|b| b.id != brew.id);
                true
            }
            Err(e) => {
                tracing::warn!(brew = brew.name(), error = %e, "failed to delete brew");
                false
            }
        }
    }

    /// Upload the session's current reading.
    ///
    /// A failed upload is logged and dropped.
    pub async fn add_data_point(&self, snapshot: &SessionSnapshot) -> bool {
        let (Some(gravity), Some(temperature), Some(battery)) =
            (snapshot.gravity, snapshot.temperature, snapshot.battery)
        else {
            tracing::debug!(brew = %snapshot.brew_name, "no reading to upload yet");
            return false;
        };

        let token = self.device_token().await;
        let name = snapshot.display_name();
        let body = DataPoint {
            token: token.as_deref(),
            name: &name,
            gravity,
            temperature,
            temp_units: snapshot.unit.symbol(),
            battery,
        };
        let request = self
            .authorized(self.http.post(self.endpoint(DATA_POINT_PATH)).json(&body))
            .await;

        match self.send(request).await {
            Ok(_) => {
                tracing::info!(brew = %snapshot.brew_name, gravity, temperature, battery, "data point sent");
                self.observer.on_data_point_reported(snapshot);
                true
            }
            Err(e) => {
                tracing::error!(brew = %snapshot.brew_name, error = %e, "failed to send data point");
                false
            }
        }
    }

    /// Ask the service for a new device token.
    pub async fn generate_device_token(&self) -> Result<String, SyncError> {
        tracing::info!("generating device token");
        let request = self.authorized(self.http.post(self.endpoint(DEVICE_TOKEN_PATH))).await;

        let DeviceTokenResponse { token } = self
            .send_json(request)
            .await
            .map_err(SyncError::DeviceToken)?;
        if token.trim().is_empty() {
            return Err(SyncError::DeviceToken(ApiError::Empty("token")));
        }

        self.auth.write().await.device_token = Some(token.clone());
        Ok(token)
    }

    /// The device token, generating and persisting one if the account has none.
    pub async fn ensure_device_token(&self) -> Result<String, SyncError> {
        if let Some(token) = self.device_token().await {
            return Ok(token);
        }

        let token = self.generate_device_token().await?;
        let saved = token.clone();
        self.store
            .update(|config| config.account.device_token = Some(saved))
            .await?;
        Ok(token)
    }
}
