//! Cluster coordination client: queries peer appliances for connected /
//! disconnected PV counts before the disconnect monitor enables metachannels.

use async_trait::async_trait;
use log::error;

use crate::error::Result;
use crate::traits::ClusterMembership;
use crate::types::PeerCounts;

/// Queries peers over HTTP. The local appliance's own URL is excluded from
/// `peer_urls` by construction.
pub struct ClusterClient {
	http: reqwest::Client,
	peers: Vec<String>,
}

impl ClusterClient {
	pub fn new(http: reqwest::Client, appliance_urls: Vec<String>, my_url: &str) -> Self {
		let peers = appliance_urls.into_iter().filter(|url| url != my_url).collect();
		Self { http, peers }
	}
}

#[async_trait]
impl ClusterMembership for ClusterClient {
	fn peer_urls(&self) -> Vec<String> {
		self.peers.clone()
	}

	async fn fetch_peer_counts(&self, engine_url: &str) -> Result<Option<PeerCounts>> {
		let url = format!("{}/ConnectedPVCountForAppliance", engine_url.trim_end_matches('/'));
		let response = match self.http.get(&url).send().await {
			Ok(resp) => resp,
			Err(err) => {
				error!("peer request to '{}' failed: {}", url, err);
				return Ok(None);
			}
		};
		let body = match response.text().await {
			Ok(body) => body,
			Err(err) => {
				error!("failed to read peer response body from '{}': {}", url, err);
				return Ok(None);
			}
		};
		match body.parse::<PeerCounts>() {
			Ok(counts) => Ok(Some(counts)),
			Err(err) => {
				error!("failed to parse peer response from '{}': {}", url, err);
				Ok(None)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn excludes_self_from_peer_list() {
		let client = ClusterClient::new(reqwest::Client::new(), vec!["http://a".to_string(), "http://b".to_string(), "http://me".to_string()], "http://me");
		let peers = client.peer_urls();
		assert_eq!(peers.len(), 2);
		assert!(!peers.contains(&"http://me".to_string()));
	}
}
