//! Docker-backed [`ContainerDriver`]: creates, starts, health-checks (via
//! the caller's [`crate::health::HealthProber`]), and tears down one
//! container per sandbox using the Docker Engine API.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::StreamExt;

use super::{ContainerDriver, ContainerHandle, ContainerSpec, DriverError, Result, SANDBOX_AGENT_PORT};

pub struct BollardContainerDriver {
    docker: Docker,
}

impl BollardContainerDriver {
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_socket_defaults().map_err(|e| DriverError::RuntimeUnavailable {
            reason: e.to_string(),
        })?;
        docker.ping().await.map_err(|e| DriverError::RuntimeUnavailable {
            reason: e.to_string(),
        })?;
        Ok(Self { docker })
    }

    async fn pull_if_missing(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }
        tracing::info!(image, "pulling worker image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| DriverError::ImagePull {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerDriver for BollardContainerDriver {
    async fn create(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        self.pull_if_missing(&spec.image).await?;

        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        exposed_ports.insert(format!("{SANDBOX_AGENT_PORT}/tcp"), HashMap::new());

        let storage_opt = spec.disk_limit_bytes.map(|limit| {
            let mut opt = HashMap::new();
            opt.insert("size".to_string(), limit.to_string());
            opt
        });

        let host_config = HostConfig {
            network_mode: Some(spec.network.clone()),
            memory: Some(spec.memory_limit_bytes),
            cpu_quota: spec.cpu_quota,
            storage_opt,
            auto_remove: Some(false),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            labels: Some(spec.labels.clone()),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| DriverError::Create {
                name: spec.name.clone(),
                reason: e.to_string(),
            })?;

        self.docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| DriverError::Start {
                name: spec.name.clone(),
                reason: e.to_string(),
            })?;

        let info = self
            .docker
            .inspect_container(&response.id, None)
            .await
            .map_err(|e| DriverError::Inspect {
                id: response.id.clone(),
                reason: e.to_string(),
            })?;

        let host = info
            .name
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| spec.name.clone());

        Ok(ContainerHandle {
            container_id: response.id,
            host,
            port: SANDBOX_AGENT_PORT,
        })
    }

    async fn destroy(&self, container_id: &str) -> Result<()> {
        let result = self
            .docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(DriverError::Remove {
                id: container_id.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn is_running(&self, container_id: &str) -> Result<bool> {
        let info = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(|e| DriverError::Inspect {
                id: container_id.to_string(),
                reason: e.to_string(),
            })?;
        Ok(info.state.is_some_and(|s| s.running == Some(true)))
    }

    async fn list_managed(&self, label: &str) -> Result<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![label.to_string()]);
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| DriverError::List { reason: e.to_string() })?;
        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }
}
