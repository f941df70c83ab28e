//! Votes, bookmarks, composing, polls and sign-up against the in-memory
//! backends.

use std::sync::Arc;
use std::time::Duration;

use cf_auth_memory::MemorySessionProvider;
use cf_core::error::{FeedError, Field, Reason};
use cf_core::models::{Fields, Identity, Post, Profile, Session, Space, VoteRecord};
use cf_core::paths;
use cf_core::traits::{DocumentStore, WriteOptions};
use cf_feed::origin::{open_reply_chain, resolve_origin, OriginState};
use cf_feed::polls::{create_poll, delete_poll, list_polls, PollController, PollDraft};
use cf_feed::posts::{count_replies, delete_post};
use cf_feed::signup::{resolve_school, SignupForm};
use cf_feed::{
    wait_for_verification, BookmarkToggle, FeedAggregator, PollPolicy, PostComposer, ReplyComposer,
    SessionContext, SessionManager, StoreHandle, VoteState, VoteTally, VoteToggle,
};
use cf_store_memory::MemoryStore;
use serde_json::{json, Value};

fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn signed_in(uid: &str) -> SessionContext {
    SessionContext::fixed(Session {
        identity: Identity {
            uid: uid.into(),
            email: Some(format!("{uid}@msu.edu")),
            email_verified: true,
        },
        profile: Profile {
            uid: uid.into(),
            first_name: "Ada".into(),
            last_name: "L".into(),
            username: format!("{uid}_name"),
            school: "Michigan State".into(),
            school_id: "msu".into(),
            ..Profile::default()
        },
    })
}

fn handle(store: &MemoryStore) -> StoreHandle {
    Arc::new(store.clone())
}

async fn compose(store: &MemoryStore, ctx: &SessionContext, space: &str, content: &str) -> Post {
    let mut composer = PostComposer::new(handle(store));
    composer.select_space(space);
    composer.set_title("title");
    composer.set_content(content);
    let id = composer.submit(ctx).await.unwrap();
    let space: Space = space.parse().unwrap();
    let doc = store
        .read_one(&paths::post(space, &id))
        .await
        .unwrap()
        .unwrap();
    Post::from_document(&doc, space).unwrap()
}

async fn my_vote_records(store: &MemoryStore, post: &Post, uid: &str) -> usize {
    let mut found = 0;
    for collection in [
        paths::upvotes(post.space, &post.id),
        paths::downvotes(post.space, &post.id),
    ] {
        if store
            .read_one(&collection.doc(uid))
            .await
            .unwrap()
            .is_some()
        {
            found += 1;
        }
    }
    found
}

#[tokio::test]
async fn a_user_never_holds_both_votes() {
    let store = MemoryStore::with_clock(1_000);
    let ctx = signed_in("u1");
    let post = compose(&store, &ctx, "memes", "cat").await;
    let mut toggle = VoteToggle::new(handle(&store), &post);

    assert_eq!(toggle.upvote(&ctx).await.unwrap(), VoteState::Upvoted);
    assert_eq!(my_vote_records(&store, &post, "u1").await, 1);
    assert_eq!(toggle.downvote(&ctx).await.unwrap(), VoteState::Downvoted);
    assert_eq!(my_vote_records(&store, &post, "u1").await, 1);
    assert_eq!(toggle.downvote(&ctx).await.unwrap(), VoteState::None);
    assert_eq!(my_vote_records(&store, &post, "u1").await, 0);

    toggle.upvote(&ctx).await.unwrap();
    let mut fresh = VoteToggle::new(handle(&store), &post);
    assert_eq!(fresh.refresh(&ctx).await.unwrap(), VoteTally { up: 1, down: 0 });
    assert_eq!(fresh.state(), VoteState::Upvoted);
}

#[tokio::test]
async fn two_views_of_one_post_share_a_single_vote() {
    let store = MemoryStore::with_clock(1_000);
    let ctx = signed_in("u1");
    let post = compose(&store, &ctx, "memes", "cat").await;
    let mut feed_view = VoteToggle::new(handle(&store), &post);
    let mut thread_view = VoteToggle::new(handle(&store), &post);
    feed_view.refresh(&ctx).await.unwrap();
    thread_view.refresh(&ctx).await.unwrap();

    feed_view.upvote(&ctx).await.unwrap();
    assert_eq!(thread_view.downvote(&ctx).await.unwrap(), VoteState::Downvoted);
    assert_eq!(thread_view.tally(), VoteTally { up: 0, down: 1 });
    assert_eq!(my_vote_records(&store, &post, "u1").await, 1);

    feed_view.refresh(&ctx).await.unwrap();
    assert_eq!(feed_view.state(), VoteState::Downvoted);
}

#[tokio::test]
async fn unrefreshed_toggle_replaces_the_stored_vote() {
    let store = MemoryStore::with_clock(1_000);
    let ctx = signed_in("u1");
    let post = compose(&store, &ctx, "rant", "ugh").await;
    VoteToggle::new(handle(&store), &post)
        .upvote(&ctx)
        .await
        .unwrap();

    let mut reloaded = VoteToggle::new(handle(&store), &post);
    assert_eq!(reloaded.downvote(&ctx).await.unwrap(), VoteState::Downvoted);
    assert_eq!(my_vote_records(&store, &post, "u1").await, 1);

    // Same direction again clears it, even from another fresh toggle.
    let mut again = VoteToggle::new(handle(&store), &post);
    assert_eq!(again.downvote(&ctx).await.unwrap(), VoteState::None);
    assert_eq!(my_vote_records(&store, &post, "u1").await, 0);
}

#[tokio::test]
async fn refresh_keeps_newest_of_two_records() {
    let store = MemoryStore::with_clock(1_000);
    let ctx = signed_in("u1");
    let post = compose(&store, &ctx, "rant", "ugh").await;
    // Interrupted switch from an older client: up at t=1001, down at t=1002.
    store
        .write(
            &paths::upvotes(post.space, &post.id).doc("u1"),
            VoteRecord::fields("u1", "u1_name"),
            WriteOptions::replace(),
        )
        .await
        .unwrap();
    store
        .write(
            &paths::downvotes(post.space, &post.id).doc("u1"),
            VoteRecord::fields("u1", "u1_name"),
            WriteOptions::replace(),
        )
        .await
        .unwrap();

    let mut toggle = VoteToggle::new(handle(&store), &post);
    let tally = toggle.refresh(&ctx).await.unwrap();
    assert_eq!(toggle.state(), VoteState::Downvoted);
    assert_eq!(tally, VoteTally { up: 0, down: 1 });
    assert_eq!(my_vote_records(&store, &post, "u1").await, 1);
}

#[tokio::test]
async fn blanked_legacy_records_do_not_count() {
    let store = MemoryStore::with_clock(1_000);
    let ctx = signed_in("u1");
    let post = compose(&store, &ctx, "news", "n").await;
    store.seed(
        &paths::upvotes(post.space, &post.id).doc("u2"),
        fields(json!({ "userId": "", "username": "" })),
    );
    store.seed(
        &paths::upvotes(post.space, &post.id).doc("u3"),
        VoteRecord::fields("u3", "c"),
    );

    let mut toggle = VoteToggle::new(handle(&store), &post);
    assert_eq!(toggle.refresh(&ctx).await.unwrap().up, 1);
}

#[tokio::test]
async fn failed_vote_write_rereads_the_store() {
    let store = MemoryStore::with_clock(1_000);
    let ctx = signed_in("u1");
    let post = compose(&store, &ctx, "memes", "m").await;
    store.fail_writes_under(paths::upvotes(post.space, &post.id).as_str());

    let mut toggle = VoteToggle::new(handle(&store), &post);
    assert!(toggle.upvote(&ctx).await.is_err());
    assert_eq!(toggle.state(), VoteState::None);
    assert_eq!(toggle.tally(), VoteTally::default());
    assert!(!toggle.is_stale());
}

#[tokio::test]
async fn bookmarks_toggle_on_and_off() {
    let store = MemoryStore::with_clock(1_000);
    let ctx = signed_in("u1");
    let post = compose(&store, &ctx, "confession", "shh").await;
    let mut toggle = BookmarkToggle::new(handle(&store), &post);

    assert!(toggle.toggle(&ctx).await.unwrap());
    let stored = store
        .read_one(&paths::bookmark("msu", "u1", &post.id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.get("postId"), Some(&Value::String(post.id.clone())));

    assert!(!toggle.toggle(&ctx).await.unwrap());
    let mut fresh = BookmarkToggle::new(handle(&store), &post);
    assert!(!fresh.refresh(&ctx).await.unwrap());
}

#[tokio::test]
async fn replies_carry_parent_and_origin() {
    let store = MemoryStore::with_clock(1_000);
    let ctx = signed_in("u1");
    let root = compose(&store, &ctx, "questions", "where is the gym?").await;

    let mut first = ReplyComposer::new(handle(&store), &root);
    first.set_content("north campus");
    let first_id = first.submit(&ctx).await.unwrap();
    let first_reply = Post::from_document(
        &store
            .read_one(&paths::post(Space::Questions, &first_id))
            .await
            .unwrap()
            .unwrap(),
        Space::Questions,
    )
    .unwrap();
    assert_eq!(first_reply.parent_id.as_deref(), Some(root.id.as_str()));
    assert_eq!(first_reply.origin_id.as_deref(), Some(root.id.as_str()));
    assert!(first_reply.title.is_empty());

    let mut second = ReplyComposer::new(handle(&store), &first_reply);
    second.set_content("thanks");
    let second_id = second.submit(&ctx).await.unwrap();
    let second_reply = Post::from_document(
        &store
            .read_one(&paths::post(Space::Questions, &second_id))
            .await
            .unwrap()
            .unwrap(),
        Space::Questions,
    )
    .unwrap();
    assert_eq!(second_reply.parent_id.as_deref(), Some(first_id.as_str()));
    assert_eq!(second_reply.origin_id.as_deref(), Some(root.id.as_str()));

    assert_eq!(count_replies(&store, &root).await.unwrap(), 1);
    assert!(matches!(
        resolve_origin(&store, &second_reply).await.unwrap(),
        OriginState::Available(origin) if origin.id == root.id
    ));

    let mut feed = FeedAggregator::open(&store, &[Space::Questions]).await;
    feed.drain_pending();
    let tree = feed.threads();
    let focused = feed.get(&first_id).unwrap();
    let chain = open_reply_chain(&store, &tree, focused).await.unwrap();
    assert_eq!(chain.replies.len(), 1);
    assert_eq!(chain.replies[0].id, second_id);

    delete_post(&store, &ctx, &root).await.unwrap();
    assert_eq!(
        resolve_origin(&store, &second_reply).await.unwrap(),
        OriginState::Unavailable {
            origin_id: root.id.clone()
        }
    );
}

#[tokio::test]
async fn empty_reply_is_rejected_before_any_write() {
    let store = MemoryStore::with_clock(1_000);
    let ctx = signed_in("u1");
    let root = compose(&store, &ctx, "memes", "post").await;

    let mut reply = ReplyComposer::new(handle(&store), &root);
    reply.set_content("   ");
    let err = reply.submit(&ctx).await.unwrap_err();
    assert_eq!(err.field(), Some(Field::Content));
    assert!(reply.is_flagged());
    assert_eq!(count_replies(&store, &root).await.unwrap(), 0);
}

#[tokio::test]
async fn store_failure_keeps_the_draft() {
    let store = MemoryStore::with_clock(1_000);
    store.fail_writes_under("spaces/news");
    let mut composer = PostComposer::new(handle(&store));
    composer.select_space("news");
    composer.set_title("headline");
    composer.set_content("body");

    let err = composer.submit(&signed_in("u1")).await.unwrap_err();
    assert!(matches!(err, FeedError::Store(_)));
    assert_eq!(composer.draft().content, "body");
}

#[tokio::test]
async fn poll_votes_move_between_options() {
    let store = MemoryStore::with_clock(1_000);
    let ctx = signed_in("u1");
    let other = signed_in("u2");
    let draft = PollDraft {
        question: "Best dining hall?".into(),
        options: vec!["Brody".into(), "Shaw".into(), "Akers".into()],
    };
    let id = create_poll(&store, &ctx, &draft).await.unwrap();
    let poll = list_polls(&store)
        .await
        .unwrap()
        .into_iter()
        .find(|p| p.id == id)
        .unwrap();
    assert_eq!(poll.created_by.as_deref(), Some("u1"));

    let mut mine = PollController::new(handle(&store), poll.clone());
    let mut theirs = PollController::new(handle(&store), poll.clone());
    assert_eq!(mine.vote(&ctx, 0).await.unwrap(), Some(0));
    assert_eq!(theirs.vote(&other, 1).await.unwrap(), Some(1));
    assert_eq!(mine.vote(&ctx, 1).await.unwrap(), Some(1));

    let tallies = mine.refresh(&ctx).await.unwrap();
    assert_eq!(tallies.iter().map(|t| t.votes).collect::<Vec<_>>(), vec![0, 2, 0]);
    assert_eq!(tallies[1].percentage, 100);

    assert_eq!(mine.vote(&ctx, 1).await.unwrap(), None);
    assert_eq!(mine.total_votes(), 1);

    let err = mine.vote(&ctx, 7).await.unwrap_err();
    assert_eq!(err.field(), Some(Field::PollOption(7)));
}

#[tokio::test]
async fn only_admins_delete_polls() {
    let store = MemoryStore::with_clock(1_000);
    let ctx = signed_in("u1");
    let draft = PollDraft {
        question: "Snow day?".into(),
        options: vec!["yes".into(), "no".into()],
    };
    let id = create_poll(&store, &ctx, &draft).await.unwrap();
    let poll = list_polls(&store).await.unwrap().remove(0);
    let admins = vec!["admin".to_string()];

    assert!(matches!(
        delete_poll(&store, &ctx, &admins, &poll).await,
        Err(FeedError::Forbidden(_))
    ));
    delete_poll(&store, &signed_in("admin"), &admins, &poll).await.unwrap();
    assert!(store.read_one(&paths::poll(&id)).await.unwrap().is_none());
}

#[tokio::test]
async fn signup_flow_resolves_school_and_waits_for_verification() {
    let store = MemoryStore::with_clock(1_000);
    store.seed(
        &paths::schools().doc("msu"),
        fields(json!({ "name": "Michigan State", "email": "msu.edu" })),
    );

    let form = SignupForm {
        username: "ada".into(),
        email: "ada@msu.edu".into(),
        password: "Correct1!".into(),
        retype_password: "Correct1!".into(),
    };
    form.validate().unwrap();
    let school = resolve_school(&store, &form.email).await.unwrap();
    assert_eq!(school.id, "msu");

    let err = resolve_school(&store, "ada@nowhere.edu").await.unwrap_err();
    assert_eq!(err.field(), Some(Field::Email));
    assert!(matches!(err, FeedError::Validation(v) if v.reason == Reason::UnknownSchool));

    let auth = MemorySessionProvider::new();
    auth.set_push_verification(true);
    let identity = auth.sign_up(&form.email, &form.password).unwrap();
    store.seed(
        &paths::user(&school.id, &identity.uid),
        fields(json!({ "uid": identity.uid, "username": "ada", "school": school.name })),
    );

    let mut manager = SessionManager::start(handle(&store), &auth);
    let ctx = manager.context();
    manager.sync().await;
    assert_eq!(ctx.require().unwrap().profile.username, "ada");

    let waiter = {
        let auth = auth.clone();
        tokio::spawn(async move {
            let policy = PollPolicy {
                interval: Duration::from_millis(10),
                max_attempts: 500,
            };
            wait_for_verification(&auth, policy).await
        })
    };
    auth.verify_email(&form.email).unwrap();
    let verified = waiter.await.unwrap().unwrap();
    assert!(verified.email_verified);

    manager.sync().await;
    assert!(ctx.require().unwrap().identity.email_verified);
}
