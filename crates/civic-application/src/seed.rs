//! Sample proposals for an empty store.

use civic_core::error::Result;
use civic_core::geo::LatLng;
use civic_core::proposal::{NewProposal, ProposalRepository, Score, ScoreScale};
use tracing::info;

struct Sample {
    key: &'static str,
    lat: f64,
    lng: f64,
    business_type: &'static str,
    author: &'static str,
    saturation: f64,
    review: &'static str,
}

// Scores predate the feasibility scale and stay on 0-10.
const SAMPLES: [Sample; 4] = [
    Sample {
        key: "seed-community-tech-hub",
        lat: 40.7128,
        lng: -74.0060,
        business_type: "Community Tech Hub",
        author: "Sarah Jenkins",
        saturation: 8.5,
        review: "A neighborhood tech hub offering free internet access, evening coding workshops for all ages, and affordable meeting space for local startups.",
    },
    Sample {
        key: "seed-rooftop-urban-farm",
        lat: 40.7135,
        lng: -74.0045,
        business_type: "Rooftop Urban Farm",
        author: "Marcus Chen",
        saturation: 9.2,
        review: "A hydroponic farm on the warehouse rooftop growing greens for nearby restaurants, with a share of every harvest donated to the local food bank.",
    },
    Sample {
        key: "seed-pedestrian-plaza-cafe",
        lat: 40.7115,
        lng: -74.0075,
        business_type: "Pedestrian Plaza & Cafe",
        author: "Elena Rodriguez",
        saturation: 7.8,
        review: "Close the side street to cars and turn it into a pedestrian-only plaza with shaded seating, a small coffee kiosk and space for street musicians.",
    },
    Sample {
        key: "seed-pop-up-art-gallery",
        lat: 40.7128,
        lng: -74.0060,
        business_type: "Pop-Up Art Gallery",
        author: "David Kim",
        saturation: 6.5,
        review: "Rotating exhibitions in converted shipping containers showcasing local artists, with pottery classes on weekends.",
    },
];

/// Writes the sample proposals when the store holds none.
///
/// Returns how many were written. Fixed submission keys keep a repeated or
/// concurrent call from duplicating them.
pub async fn seed_if_empty(repository: &dyn ProposalRepository) -> Result<usize> {
    if !repository.list_recent(1).await?.is_empty() {
        return Ok(0);
    }

    for sample in &SAMPLES {
        repository
            .create(NewProposal {
                submission_key: sample.key.to_string(),
                location: LatLng::new(sample.lat, sample.lng),
                business_type: sample.business_type.to_string(),
                review: sample.review.to_string(),
                author: sample.author.to_string(),
                score: Score::new(sample.saturation, ScoreScale::Saturation10),
                vision_image: None,
                parent_proposal_id: None,
                flags: Vec::new(),
                owner_id: None,
            })
            .await?;
    }

    info!(count = SAMPLES.len(), "Seeded sample proposals");
    Ok(SAMPLES.len())
}
